mod backend;
pub mod backends;
mod nms;
mod registry;
mod result;

pub use backend::DetectorBackend;
pub use backends::{ScriptHandle, ScriptedBackend};
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use nms::non_max_suppression;
pub use registry::{BackendRegistry, SharedBackend};
pub use result::{BoundingBox, Detection};

/// Class names of the deployed model, in output-index order.
pub const DEFAULT_CLASS_NAMES: &[&str] = &[
    "Cap", "Coke", "Crystal", "Honey", "M100", "Mansome", "Milk1", "Milk2", "Not_cap", "Vitamilk",
];
