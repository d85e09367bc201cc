//! Controller wiring.
//!
//! [`Devices::open`] acquires every hardware resource from a [`SorterConfig`]; any failure
//! there aborts startup. [`Sorter::start`] then spawns the three worker threads (frame
//! acquisition, trigger loop, display loop) and registers the teardown steps with the
//! session's [`SessionShutdown`].

use anyhow::{anyhow, Context, Result};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::actuator::{ActuatorController, MotorPins};
use crate::audio::{self, AudioSink};
use crate::clock::{Clock, SystemClock};
use crate::config::{CameraSettings, ClassifierSettings, SorterConfig};
use crate::detect::{BackendRegistry, ScriptedBackend, SharedBackend};
use crate::frame::Frame;
use crate::gpio::{self, InputPin, SharedGpio};
use crate::ingest::{self, CaptureDevice, FrameSource};
use crate::resolve::CategoryResolver;
use crate::shutdown::{SessionShutdown, ShutdownSignal};
use crate::trigger::{GpioSensor, ManualTrigger, TriggerLoop, TriggerLoopParts, TriggerStats};
use crate::ui::{SharedDisplay, UiLoop};

/// Hardware and external collaborators the controller drives.
pub struct Devices {
    pub gpio: SharedGpio,
    pub camera: Box<dyn CaptureDevice>,
    pub classifier: SharedBackend,
    pub audio: Arc<dyn AudioSink>,
    pub display: SharedDisplay,
    pub clock: Arc<dyn Clock>,
}

impl Devices {
    pub fn open(config: &SorterConfig, display: SharedDisplay) -> Result<Self> {
        let gpio = gpio::open_gpio(&config.gpio).context("GPIO unavailable")?;
        let camera = ingest::open_capture(&config.camera)?;
        let classifier = open_classifier(config)?;
        let audio = audio::open_audio(&config.audio)?;
        Ok(Self {
            gpio,
            camera,
            classifier,
            audio,
            display,
            clock: Arc::new(SystemClock),
        })
    }
}

/// Build the backend registry and return the configured backend, warmed up.
pub fn open_classifier(config: &SorterConfig) -> Result<SharedBackend> {
    let settings = &config.classifier;
    let mut registry = BackendRegistry::new();
    registry.register(ScriptedBackend::with_fixed_classes(&settings.stub_classes));
    #[cfg(feature = "backend-tract")]
    if settings.backend == "tract" {
        let backend = crate::detect::TractBackend::new(
            &settings.model_path,
            settings.input_width,
            settings.input_height,
            settings.class_names.clone(),
        )?
        .with_threshold(config.resolver.confidence_threshold)
        .with_iou(settings.iou_threshold);
        registry.register(backend);
    }
    registry.set_default(&settings.backend)?;
    let backend = registry
        .default_backend()
        .ok_or_else(|| anyhow!("no classifier backend selected"))?;

    let frame = warmup_frame(settings, &config.camera)?;
    {
        let mut guard = backend.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        log::info!("classifier: warming up {} backend", guard.name());
        guard.warm_up(&frame).context("classifier warm-up failed")?;
    }
    Ok(backend)
}

fn warmup_frame(settings: &ClassifierSettings, camera: &CameraSettings) -> Result<Frame> {
    match &settings.warmup_image {
        Some(path) => ingest::still::load_still_frame(path),
        None => Frame::blank(camera.width, camera.height, 0),
    }
}

/// A running controller.
pub struct Sorter {
    session: Arc<SessionShutdown>,
    manual: ManualTrigger,
    stats: Arc<Mutex<Option<TriggerStats>>>,
}

impl Sorter {
    /// Start every worker. Errors here leave no thread running and every pin LOW.
    pub fn start(config: &SorterConfig, devices: Devices) -> Result<Self> {
        Self::start_with_signal(config, devices, ShutdownSignal::new())
    }

    /// Like `start`, but stops on a signal the caller already holds.
    ///
    /// A signal that fired before this call still yields a started controller; its workers
    /// exit at once and `shutdown` tears them down as usual.
    pub fn start_with_signal(
        config: &SorterConfig,
        devices: Devices,
        signal: ShutdownSignal,
    ) -> Result<Self> {
        let session = Arc::new(SessionShutdown::new(signal.clone()));
        let Devices {
            gpio,
            camera,
            classifier,
            audio,
            display,
            clock,
        } = devices;

        let pins = MotorPins::from_settings(&config.gpio)?;
        let actuator = Arc::new(
            ActuatorController::new(Arc::clone(&gpio), pins, signal.clone())
                .context("failed to configure motor pins")?,
        );
        {
            let gpio = Arc::clone(&gpio);
            let actuator = Arc::clone(&actuator);
            let cleanup = move || -> Result<()> {
                let safe = actuator.force_safe();
                let released = gpio::lock(&gpio).cleanup();
                safe.and(released)
            };
            session.register_final("gpio", cleanup);
        }
        let sensor = match InputPin::setup(Arc::clone(&gpio), config.gpio.trigger_pin) {
            Ok(sensor) => sensor,
            Err(err) => {
                session.run();
                return Err(err.context("failed to configure trigger pin"));
            }
        };

        let mut frame_source = FrameSource::new(camera, config.camera.target_fps);
        if let Err(err) = frame_source.start() {
            session.run();
            return Err(err);
        }
        let frames = frame_source.frames();

        let (ui_loop, ui_handle) = UiLoop::new(display, Arc::clone(&clock));
        let ui_thread = match ui_loop.spawn() {
            Ok(handle) => handle,
            Err(err) => {
                frame_source.stop();
                session.run();
                return Err(anyhow::Error::new(err).context("failed to start display loop"));
            }
        };

        let trigger = TriggerLoop::new(TriggerLoopParts {
            sensor: Box::new(GpioSensor::new(sensor)),
            frames,
            classifier,
            resolver: CategoryResolver::new(config.resolver.clone()),
            actuator: Arc::clone(&actuator),
            audio: Arc::clone(&audio),
            ui: Box::new(ui_handle.clone()),
            timing: config.timing.clone(),
            snapshot_path: Some(config.display.snapshot_path.clone()),
            shutdown: signal.clone(),
            clock,
        });
        let manual = trigger.manual_trigger();
        let stats = Arc::new(Mutex::new(None));
        let trigger_thread = {
            let stats = Arc::clone(&stats);
            std::thread::Builder::new()
                .name("trigger".to_string())
                .spawn(move || {
                    let final_stats = trigger.run();
                    *stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) =
                        Some(final_stats);
                })
        };
        let trigger_thread = match trigger_thread {
            Ok(handle) => handle,
            Err(err) => {
                ui_handle.shutdown();
                let _ = ui_thread.join();
                frame_source.stop();
                session.run();
                return Err(anyhow::Error::new(err).context("failed to start trigger loop"));
            }
        };

        session.register("trigger loop", move || join_worker("trigger", trigger_thread));
        session.register("camera", move || {
            frame_source.stop();
            Ok(())
        });
        session.register("display", move || {
            ui_handle.shutdown();
            join_worker("ui", ui_thread)
        });
        session.register("audio", move || {
            audio.stop();
            Ok(())
        });

        log::info!("sorter started");
        Ok(Self {
            session,
            manual,
            stats,
        })
    }

    pub fn session(&self) -> Arc<SessionShutdown> {
        Arc::clone(&self.session)
    }

    pub fn signal(&self) -> ShutdownSignal {
        self.session.signal().clone()
    }

    pub fn manual_trigger(&self) -> ManualTrigger {
        self.manual.clone()
    }

    /// Block until something requests shutdown.
    pub fn wait(&self) {
        let signal = self.session.signal();
        while !signal.wait_timeout(std::time::Duration::from_secs(3600)) {}
    }

    /// Run the session teardown (once) and return the trigger loop statistics.
    pub fn shutdown(&self) -> Option<TriggerStats> {
        self.session.run();
        self.stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

fn join_worker(name: &str, handle: JoinHandle<()>) -> Result<()> {
    handle
        .join()
        .map_err(|_| anyhow!("{} thread panicked", name))
}
