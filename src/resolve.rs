//! Category resolution: detections in, exactly one sort category out.
//!
//! The resolver is a pure function of its configuration and the detection list. Only
//! detections at or above the confidence threshold count. Classes are mapped through a
//! fixed rule table into three typed signals (cap state, product family, direct category),
//! which are then combined in a fixed precedence order:
//!
//! 1. family override: FamilyA without cap → Blue, FamilyB without cap → Green
//! 2. direct category (Coke → Green, Milk → configured bucket)
//! 3. optional strict mode: no cap signal at all → Error
//! 4. any tracked class matched → NoCap (the item still carries its cap)
//! 5. nothing tracked → Error

use serde::{Deserialize, Serialize};

use crate::detect::Detection;

/// Default minimum confidence for a detection to count.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.7;

/// Final sort decision for one trigger cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SortCategory {
    NoCap = 0,
    Blue = 1,
    Yellow = 2,
    Green = 3,
    Error = 4,
}

impl SortCategory {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Categories that physically route the item.
    pub fn is_sorted(self) -> bool {
        matches!(
            self,
            SortCategory::Blue | SortCategory::Yellow | SortCategory::Green
        )
    }
}

impl std::fmt::Display for SortCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SortCategory::NoCap => "no-cap",
            SortCategory::Blue => "blue",
            SortCategory::Yellow => "yellow",
            SortCategory::Green => "green",
            SortCategory::Error => "error",
        };
        write!(f, "{}({})", name, self.code())
    }
}

/// Whether the bottle still wears its cap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CapState {
    Cap,
    NotCap,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProductFamily {
    Unknown,
    /// Mansome / Honey / Crystal
    FamilyA,
    /// M100 / Vitamilk
    FamilyB,
}

/// Bucket for Milk1/Milk2 detections. The deployed controllers disagree, so it is a
/// configuration choice.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MilkMapping {
    #[default]
    Yellow,
    Green,
}

impl MilkMapping {
    pub fn category(self) -> SortCategory {
        match self {
            MilkMapping::Yellow => SortCategory::Yellow,
            MilkMapping::Green => SortCategory::Green,
        }
    }
}

impl std::str::FromStr for MilkMapping {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yellow" | "2" => Ok(MilkMapping::Yellow),
            "green" | "3" => Ok(MilkMapping::Green),
            other => Err(anyhow::anyhow!(
                "milk category must be 'yellow' or 'green', got '{}'",
                other
            )),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResolverConfig {
    pub confidence_threshold: f32,
    pub milk_category: MilkMapping,
    /// Yield Error when neither Cap nor Not_cap was seen and no direct class matched.
    ///
    /// Off by default, which matches the bench controller: a product with no cap label
    /// falls through to the capped route (NoCap). The production controller flags that
    /// case as Error; turn this on to get its behaviour.
    pub require_cap_signal: bool,
    /// Compare class names case-insensitively.
    pub case_tolerant: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            milk_category: MilkMapping::Yellow,
            require_cap_signal: false,
            case_tolerant: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ClassRule {
    CapPresent,
    CapRemoved,
    Family(ProductFamily),
    Milk,
    Coke,
}

const CLASS_RULES: &[(&str, ClassRule)] = &[
    ("Cap", ClassRule::CapPresent),
    ("Not_cap", ClassRule::CapRemoved),
    ("Not_Cap", ClassRule::CapRemoved),
    ("Mansome", ClassRule::Family(ProductFamily::FamilyA)),
    ("Honey", ClassRule::Family(ProductFamily::FamilyA)),
    ("Crystal", ClassRule::Family(ProductFamily::FamilyA)),
    ("M100", ClassRule::Family(ProductFamily::FamilyB)),
    ("Vitamilk", ClassRule::Family(ProductFamily::FamilyB)),
    ("Milk1", ClassRule::Milk),
    ("Milk2", ClassRule::Milk),
    ("Coke", ClassRule::Coke),
];

/// Everything the resolver derived for one detection list.
#[derive(Clone, Debug, PartialEq)]
pub struct Resolution {
    pub category: SortCategory,
    pub cap_state: CapState,
    /// True when a Cap or Not_cap detection qualified.
    pub cap_signal_seen: bool,
    pub family: ProductFamily,
    pub direct: Option<SortCategory>,
    /// Tracked class names that qualified, in detection order.
    pub matched: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct CategoryResolver {
    config: ResolverConfig,
}

impl CategoryResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn resolve(&self, detections: &[Detection]) -> SortCategory {
        self.resolve_detailed(detections).category
    }

    pub fn resolve_detailed(&self, detections: &[Detection]) -> Resolution {
        let threshold = self.config.confidence_threshold;
        let mut cap_seen = false;
        let mut not_cap_seen = false;
        let mut family = ProductFamily::Unknown;
        let mut milk_seen = false;
        let mut coke_seen = false;
        let mut matched = Vec::new();

        for detection in detections {
            // NaN confidences never qualify.
            if !(detection.confidence >= threshold) {
                continue;
            }
            let Some(rule) = self.lookup(&detection.class_name) else {
                continue;
            };
            matched.push(detection.class_name.clone());
            match rule {
                ClassRule::CapPresent => cap_seen = true,
                ClassRule::CapRemoved => not_cap_seen = true,
                // FamilyB outranks FamilyA whatever the detection order.
                ClassRule::Family(f) => family = family.max(f),
                ClassRule::Milk => milk_seen = true,
                ClassRule::Coke => coke_seen = true,
            }
        }

        // A visible cap always wins over a Not_cap on the same frame.
        let cap_state = if cap_seen || !not_cap_seen {
            CapState::Cap
        } else {
            CapState::NotCap
        };
        let cap_signal_seen = cap_seen || not_cap_seen;

        let direct = if coke_seen {
            Some(SortCategory::Green)
        } else if milk_seen {
            Some(self.config.milk_category.category())
        } else {
            None
        };

        let category = match (family, cap_state) {
            (ProductFamily::FamilyA, CapState::NotCap) => SortCategory::Blue,
            (ProductFamily::FamilyB, CapState::NotCap) => SortCategory::Green,
            _ => match direct {
                Some(category) => category,
                None if self.config.require_cap_signal && !cap_signal_seen => SortCategory::Error,
                None if !matched.is_empty() => SortCategory::NoCap,
                None => SortCategory::Error,
            },
        };

        Resolution {
            category,
            cap_state,
            cap_signal_seen,
            family,
            direct,
            matched,
        }
    }

    fn lookup(&self, class_name: &str) -> Option<ClassRule> {
        let name = class_name.trim();
        CLASS_RULES.iter().find_map(|(known, rule)| {
            let hit = if self.config.case_tolerant {
                known.eq_ignore_ascii_case(name)
            } else {
                *known == name
            };
            hit.then_some(*rule)
        })
    }
}

/// Resolve with the default configuration and an explicit threshold.
pub fn resolve(detections: &[Detection], confidence_threshold: f32) -> SortCategory {
    CategoryResolver::new(ResolverConfig {
        confidence_threshold,
        ..ResolverConfig::default()
    })
    .resolve(detections)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_CLASSES: &[&str] = &[
        "Cap", "Not_cap", "Mansome", "Honey", "Crystal", "M100", "Vitamilk", "Milk1", "Milk2",
        "Coke",
    ];

    fn det(name: &str, confidence: f32) -> Detection {
        Detection::labelled(name, confidence)
    }

    fn dets(names: &[&str]) -> Vec<Detection> {
        names.iter().map(|n| det(n, 0.9)).collect()
    }

    /// Every subset of the tracked classes, each at high confidence.
    fn all_subsets() -> Vec<Vec<&'static str>> {
        (0u32..(1 << ALL_CLASSES.len()))
            .map(|mask| {
                ALL_CLASSES
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| mask & (1 << i) != 0)
                    .map(|(_, n)| *n)
                    .collect()
            })
            .collect()
    }

    fn resolver() -> CategoryResolver {
        CategoryResolver::default()
    }

    #[test]
    fn empty_list_is_error() {
        assert_eq!(resolver().resolve(&[]), SortCategory::Error);
    }

    #[test]
    fn nothing_above_threshold_is_error() {
        for subset in all_subsets() {
            let low: Vec<_> = subset.iter().map(|n| det(n, 0.69)).collect();
            assert_eq!(resolver().resolve(&low), SortCategory::Error, "{:?}", subset);
        }
    }

    #[test]
    fn threshold_is_inclusive() {
        assert_eq!(
            resolver().resolve(&[det("Coke", 0.7)]),
            SortCategory::Green
        );
        assert_eq!(resolver().resolve(&[det("Coke", f32::NAN)]), SortCategory::Error);
    }

    #[test]
    fn family_a_without_cap_is_blue() {
        for subset in all_subsets() {
            let has_a = subset
                .iter()
                .any(|n| matches!(*n, "Mansome" | "Honey" | "Crystal"));
            let has_b = subset.iter().any(|n| matches!(*n, "M100" | "Vitamilk"));
            if !has_a || has_b || !subset.contains(&"Not_cap") || subset.contains(&"Cap") {
                continue;
            }
            assert_eq!(resolver().resolve(&dets(&subset)), SortCategory::Blue, "{:?}", subset);
        }
    }

    #[test]
    fn capped_family_a_never_routes_blue() {
        for subset in all_subsets() {
            let has_a = subset
                .iter()
                .any(|n| matches!(*n, "Mansome" | "Honey" | "Crystal"));
            if !has_a || !subset.contains(&"Cap") {
                continue;
            }
            assert_ne!(resolver().resolve(&dets(&subset)), SortCategory::Blue, "{:?}", subset);
        }
    }

    #[test]
    fn resolution_is_idempotent_and_order_independent() {
        let r = resolver();
        for subset in all_subsets() {
            let forward = dets(&subset);
            let mut backward = forward.clone();
            backward.reverse();
            let first = r.resolve(&forward);
            assert_eq!(first, r.resolve(&forward));
            assert_eq!(first, r.resolve(&backward), "{:?}", subset);
        }
    }

    #[test]
    fn mansome_without_cap_is_blue() {
        let list = vec![det("Mansome", 0.9), det("Not_cap", 0.95)];
        let resolution = resolver().resolve_detailed(&list);
        assert_eq!(resolution.category, SortCategory::Blue);
        assert_eq!(resolution.cap_state, CapState::NotCap);
        assert_eq!(resolution.family, ProductFamily::FamilyA);
        assert_eq!(resolution.matched, vec!["Mansome", "Not_cap"]);
    }

    #[test]
    fn family_b_without_cap_is_green() {
        assert_eq!(
            resolver().resolve(&dets(&["Vitamilk", "Not_Cap"])),
            SortCategory::Green
        );
    }

    #[test]
    fn family_b_beats_family_a() {
        let r = resolver();
        assert_eq!(r.resolve(&dets(&["M100", "Honey", "Not_cap"])), SortCategory::Green);
        assert_eq!(r.resolve(&dets(&["Honey", "M100", "Not_cap"])), SortCategory::Green);
        assert_eq!(
            r.resolve_detailed(&dets(&["Crystal", "M100"])).family,
            ProductFamily::FamilyB
        );
    }

    #[test]
    fn capped_bottle_asks_for_cap_removal() {
        assert_eq!(resolver().resolve(&dets(&["Mansome", "Cap"])), SortCategory::NoCap);
        assert_eq!(resolver().resolve(&dets(&["Cap"])), SortCategory::NoCap);
        // No cap signal at all still assumes a cap.
        assert_eq!(resolver().resolve(&dets(&["Honey"])), SortCategory::NoCap);
    }

    #[test]
    fn milk_follows_configured_mapping() {
        let yellow = CategoryResolver::new(ResolverConfig {
            milk_category: MilkMapping::Yellow,
            ..ResolverConfig::default()
        });
        let green = CategoryResolver::new(ResolverConfig {
            milk_category: MilkMapping::Green,
            ..ResolverConfig::default()
        });
        let list = vec![det("Milk2", 0.8)];
        assert_eq!(yellow.resolve(&list), SortCategory::Yellow);
        assert_eq!(green.resolve(&list), SortCategory::Green);
    }

    #[test]
    fn coke_is_green_and_beats_milk() {
        assert_eq!(resolver().resolve(&dets(&["Coke"])), SortCategory::Green);
        assert_eq!(resolver().resolve(&dets(&["Milk1", "Coke"])), SortCategory::Green);
        assert_eq!(resolver().resolve(&dets(&["Coke", "Milk1"])), SortCategory::Green);
    }

    #[test]
    fn family_override_beats_direct_class() {
        assert_eq!(
            resolver().resolve(&dets(&["Milk1", "Crystal", "Not_cap"])),
            SortCategory::Blue
        );
        // Capped family does not override the direct class.
        assert_eq!(
            resolver().resolve(&dets(&["Milk1", "Crystal", "Cap"])),
            SortCategory::Yellow
        );
    }

    #[test]
    fn unknown_classes_are_ignored() {
        assert_eq!(resolver().resolve(&dets(&["Pepsi", "hand"])), SortCategory::Error);
        assert_eq!(resolver().resolve(&dets(&["Pepsi", "Cap"])), SortCategory::NoCap);
    }

    #[test]
    fn strict_mode_requires_a_cap_signal() {
        let strict = CategoryResolver::new(ResolverConfig {
            require_cap_signal: true,
            ..ResolverConfig::default()
        });
        assert_eq!(strict.resolve(&dets(&["Mansome"])), SortCategory::Error);
        assert_eq!(strict.resolve(&dets(&["Mansome", "Cap"])), SortCategory::NoCap);
        assert_eq!(strict.resolve(&dets(&["Milk2"])), SortCategory::Yellow);

        // Default mode treats a product without any cap label as capped.
        assert_eq!(resolver().resolve(&dets(&["Mansome"])), SortCategory::NoCap);
        assert_eq!(resolver().resolve(&dets(&["Vitamilk"])), SortCategory::NoCap);
    }

    #[test]
    fn casing_tolerance_is_configurable() {
        let exact = CategoryResolver::new(ResolverConfig {
            case_tolerant: false,
            ..ResolverConfig::default()
        });
        assert_eq!(exact.resolve(&dets(&["Honey", "Not_Cap"])), SortCategory::Blue);
        assert_eq!(exact.resolve(&dets(&["honey", "not_cap"])), SortCategory::Error);
        assert_eq!(resolver().resolve(&dets(&["honey", "NOT_CAP"])), SortCategory::Blue);
    }

    #[test]
    fn free_function_uses_given_threshold() {
        let list = vec![det("Coke", 0.5)];
        assert_eq!(resolve(&list, 0.7), SortCategory::Error);
        assert_eq!(resolve(&list, 0.4), SortCategory::Green);
    }

    #[test]
    fn milk_mapping_parses() {
        assert_eq!("Yellow".parse::<MilkMapping>().unwrap(), MilkMapping::Yellow);
        assert_eq!("green".parse::<MilkMapping>().unwrap(), MilkMapping::Green);
        assert!("blue".parse::<MilkMapping>().is_err());
    }
}
