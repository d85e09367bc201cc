use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::DEFAULT_CLASS_NAMES;
use crate::resolve::{MilkMapping, ResolverConfig, DEFAULT_CONFIDENCE_THRESHOLD};

const DEFAULT_CAMERA_DEVICE: &str = "/dev/video0";
const DEFAULT_CAMERA_WIDTH: u32 = 1920;
const DEFAULT_CAMERA_HEIGHT: u32 = 1080;
const DEFAULT_CAMERA_FPS: u32 = 30;
const DEFAULT_CAMERA_FOURCC: &str = "MJPG";
const DEFAULT_SYSFS_ROOT: &str = "/sys/class/gpio";
const DEFAULT_MODEL_PATH: &str = "model/all.onnx";
const DEFAULT_MODEL_INPUT: u32 = 640;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const DEFAULT_PLAYER: &str = "mpg123 -q";
const DEFAULT_SNAPSHOT_PATH: &str = "snapshot.jpg";

#[derive(Debug, Deserialize, Default)]
struct SorterConfigFile {
    camera: Option<CameraConfigFile>,
    gpio: Option<GpioConfigFile>,
    classifier: Option<ClassifierConfigFile>,
    resolver: Option<ResolverConfigFile>,
    timing: Option<TimingConfigFile>,
    audio: Option<AudioConfigFile>,
    display: Option<DisplayConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    fourcc: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct GpioConfigFile {
    backend: Option<String>,
    sysfs_root: Option<PathBuf>,
    pin_offset: Option<u32>,
    trigger_pin: Option<u32>,
    m1_up: Option<u32>,
    m1_down: Option<u32>,
    m2_up: Option<u32>,
    m2_down: Option<u32>,
    m3_up: Option<u32>,
    m3_down: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ClassifierConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    class_names: Option<Vec<String>>,
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    warmup_image: Option<PathBuf>,
    stub_classes: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct ResolverConfigFile {
    milk_category: Option<String>,
    require_cap_signal: Option<bool>,
    case_tolerant: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct TimingConfigFile {
    poll_interval_ms: Option<u64>,
    settle_ms: Option<u64>,
    rearm_ms: Option<u64>,
    pulse_up_ms: Option<u64>,
    pulse_down_ms: Option<u64>,
    announce_hold_ms: Option<u64>,
    countdown_secs: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct AudioConfigFile {
    enabled: Option<bool>,
    player: Option<String>,
    error_sound: Option<PathBuf>,
    cap_sound: Option<PathBuf>,
    ok_sound: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct DisplayConfigFile {
    snapshot_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct SorterConfig {
    pub camera: CameraSettings,
    pub gpio: GpioSettings,
    pub classifier: ClassifierSettings,
    pub resolver: ResolverConfig,
    pub timing: TimingSettings,
    pub audio: AudioSettings,
    pub display: DisplaySettings,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    /// `/dev/videoN`, `stub://name` for synthetic frames, or a JPEG/PNG path.
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    pub fourcc: String,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            device: DEFAULT_CAMERA_DEVICE.to_string(),
            width: DEFAULT_CAMERA_WIDTH,
            height: DEFAULT_CAMERA_HEIGHT,
            target_fps: DEFAULT_CAMERA_FPS,
            fourcc: DEFAULT_CAMERA_FOURCC.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpioBackendKind {
    Sysfs,
    Stub,
}

impl std::str::FromStr for GpioBackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sysfs" => Ok(GpioBackendKind::Sysfs),
            "stub" | "mock" => Ok(GpioBackendKind::Stub),
            other => Err(anyhow!("gpio backend must be 'sysfs' or 'stub', got '{}'", other)),
        }
    }
}

/// BCM pin numbers.
#[derive(Debug, Clone)]
pub struct GpioSettings {
    pub backend: GpioBackendKind,
    pub sysfs_root: PathBuf,
    /// Added to every pin number before it reaches sysfs (gpiochip base).
    pub pin_offset: u32,
    pub trigger_pin: u32,
    pub m1_up: u32,
    pub m1_down: u32,
    pub m2_up: u32,
    pub m2_down: u32,
    pub m3_up: u32,
    pub m3_down: u32,
}

impl Default for GpioSettings {
    fn default() -> Self {
        Self {
            backend: GpioBackendKind::Sysfs,
            sysfs_root: PathBuf::from(DEFAULT_SYSFS_ROOT),
            pin_offset: 0,
            trigger_pin: 12,
            m1_up: 4,
            m1_down: 17,
            m2_up: 27,
            m2_down: 22,
            m3_up: 5,
            m3_down: 6,
        }
    }
}

impl GpioSettings {
    pub fn output_pins(&self) -> [u32; 6] {
        [
            self.m1_up,
            self.m1_down,
            self.m2_up,
            self.m2_down,
            self.m3_up,
            self.m3_down,
        ]
    }
}

#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    pub backend: String,
    pub model_path: PathBuf,
    pub input_width: u32,
    pub input_height: u32,
    pub class_names: Vec<String>,
    pub iou_threshold: f32,
    pub warmup_image: Option<PathBuf>,
    /// Classes the stub backend reports on every call; empty means "nothing seen".
    pub stub_classes: Vec<String>,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            backend: default_classifier_backend().to_string(),
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            input_width: DEFAULT_MODEL_INPUT,
            input_height: DEFAULT_MODEL_INPUT,
            class_names: DEFAULT_CLASS_NAMES.iter().map(|s| s.to_string()).collect(),
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            warmup_image: None,
            stub_classes: Vec::new(),
        }
    }
}

fn default_classifier_backend() -> &'static str {
    if cfg!(feature = "backend-tract") {
        "tract"
    } else {
        "stub"
    }
}

#[derive(Debug, Clone)]
pub struct TimingSettings {
    pub poll_interval: Duration,
    pub settle: Duration,
    pub rearm: Duration,
    pub pulse_up: Duration,
    pub pulse_down: Duration,
    pub announce_hold: Duration,
    pub countdown_secs: u32,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(20),
            settle: Duration::from_millis(1000),
            rearm: Duration::from_millis(1000),
            pulse_up: Duration::from_millis(400),
            pulse_down: Duration::from_millis(450),
            announce_hold: Duration::from_millis(2000),
            countdown_secs: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AudioSettings {
    pub enabled: bool,
    /// Player command line; the sound file is appended as the last argument.
    pub player: String,
    pub error_sound: PathBuf,
    pub cap_sound: PathBuf,
    pub ok_sound: PathBuf,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            player: DEFAULT_PLAYER.to_string(),
            error_sound: PathBuf::from("sound/error.mp3"),
            cap_sound: PathBuf::from("sound/cap.mp3"),
            ok_sound: PathBuf::from("sound/ok.mp3"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DisplaySettings {
    pub snapshot_path: PathBuf,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            snapshot_path: PathBuf::from(DEFAULT_SNAPSHOT_PATH),
        }
    }
}

impl SorterConfig {
    /// Load from `SORTER_CONFIG` (if set), then defaults, then environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SORTER_CONFIG").ok();
        Self::load_with(config_path.as_deref().map(Path::new))
    }

    /// Same as [`SorterConfig::load`] with an explicit file taking priority over `SORTER_CONFIG`.
    pub fn load_from(path: &Path) -> Result<Self> {
        Self::load_with(Some(path))
    }

    fn load_with(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SorterConfigFile) -> Result<Self> {
        let camera_file = file.camera.unwrap_or_default();
        let camera_defaults = CameraSettings::default();
        let camera = CameraSettings {
            device: camera_file.device.unwrap_or(camera_defaults.device),
            width: camera_file.width.unwrap_or(camera_defaults.width),
            height: camera_file.height.unwrap_or(camera_defaults.height),
            target_fps: camera_file.target_fps.unwrap_or(camera_defaults.target_fps),
            fourcc: camera_file.fourcc.unwrap_or(camera_defaults.fourcc),
        };

        let gpio_file = file.gpio.unwrap_or_default();
        let gpio_defaults = GpioSettings::default();
        let gpio = GpioSettings {
            backend: match gpio_file.backend.as_deref() {
                Some(kind) => kind.parse()?,
                None => gpio_defaults.backend,
            },
            sysfs_root: gpio_file.sysfs_root.unwrap_or(gpio_defaults.sysfs_root),
            pin_offset: gpio_file.pin_offset.unwrap_or(gpio_defaults.pin_offset),
            trigger_pin: gpio_file.trigger_pin.unwrap_or(gpio_defaults.trigger_pin),
            m1_up: gpio_file.m1_up.unwrap_or(gpio_defaults.m1_up),
            m1_down: gpio_file.m1_down.unwrap_or(gpio_defaults.m1_down),
            m2_up: gpio_file.m2_up.unwrap_or(gpio_defaults.m2_up),
            m2_down: gpio_file.m2_down.unwrap_or(gpio_defaults.m2_down),
            m3_up: gpio_file.m3_up.unwrap_or(gpio_defaults.m3_up),
            m3_down: gpio_file.m3_down.unwrap_or(gpio_defaults.m3_down),
        };

        let classifier_file = file.classifier.unwrap_or_default();
        let classifier_defaults = ClassifierSettings::default();
        let confidence_threshold = classifier_file
            .confidence_threshold
            .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD);
        let classifier = ClassifierSettings {
            backend: classifier_file.backend.unwrap_or(classifier_defaults.backend),
            model_path: classifier_file
                .model_path
                .unwrap_or(classifier_defaults.model_path),
            input_width: classifier_file
                .input_width
                .unwrap_or(classifier_defaults.input_width),
            input_height: classifier_file
                .input_height
                .unwrap_or(classifier_defaults.input_height),
            class_names: classifier_file
                .class_names
                .unwrap_or(classifier_defaults.class_names),
            iou_threshold: classifier_file
                .iou_threshold
                .unwrap_or(classifier_defaults.iou_threshold),
            warmup_image: classifier_file.warmup_image,
            stub_classes: classifier_file.stub_classes.unwrap_or_default(),
        };

        let resolver_file = file.resolver.unwrap_or_default();
        let resolver_defaults = ResolverConfig::default();
        let resolver = ResolverConfig {
            confidence_threshold,
            milk_category: match resolver_file.milk_category.as_deref() {
                Some(milk) => milk.parse()?,
                None => resolver_defaults.milk_category,
            },
            require_cap_signal: resolver_file
                .require_cap_signal
                .unwrap_or(resolver_defaults.require_cap_signal),
            case_tolerant: resolver_file
                .case_tolerant
                .unwrap_or(resolver_defaults.case_tolerant),
        };

        let timing_file = file.timing.unwrap_or_default();
        let timing_defaults = TimingSettings::default();
        let millis_or = |value: Option<u64>, default: Duration| {
            value.map(Duration::from_millis).unwrap_or(default)
        };
        let timing = TimingSettings {
            poll_interval: millis_or(timing_file.poll_interval_ms, timing_defaults.poll_interval),
            settle: millis_or(timing_file.settle_ms, timing_defaults.settle),
            rearm: millis_or(timing_file.rearm_ms, timing_defaults.rearm),
            pulse_up: millis_or(timing_file.pulse_up_ms, timing_defaults.pulse_up),
            pulse_down: millis_or(timing_file.pulse_down_ms, timing_defaults.pulse_down),
            announce_hold: millis_or(timing_file.announce_hold_ms, timing_defaults.announce_hold),
            countdown_secs: timing_file
                .countdown_secs
                .unwrap_or(timing_defaults.countdown_secs),
        };

        let audio_file = file.audio.unwrap_or_default();
        let audio_defaults = AudioSettings::default();
        let audio = AudioSettings {
            enabled: audio_file.enabled.unwrap_or(audio_defaults.enabled),
            player: audio_file.player.unwrap_or(audio_defaults.player),
            error_sound: audio_file.error_sound.unwrap_or(audio_defaults.error_sound),
            cap_sound: audio_file.cap_sound.unwrap_or(audio_defaults.cap_sound),
            ok_sound: audio_file.ok_sound.unwrap_or(audio_defaults.ok_sound),
        };

        let display = DisplaySettings {
            snapshot_path: file
                .display
                .and_then(|display| display.snapshot_path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOT_PATH)),
        };

        Ok(Self {
            camera,
            gpio,
            classifier,
            resolver,
            timing,
            audio,
            display,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(device) = std::env::var("SORTER_CAMERA_DEVICE") {
            if !device.trim().is_empty() {
                self.camera.device = device;
            }
        }
        if let Ok(backend) = std::env::var("SORTER_GPIO_BACKEND") {
            if !backend.trim().is_empty() {
                self.gpio.backend = backend.parse()?;
            }
        }
        if let Ok(path) = std::env::var("SORTER_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.classifier.model_path = PathBuf::from(path);
            }
        }
        if let Ok(backend) = std::env::var("SORTER_CLASSIFIER") {
            if !backend.trim().is_empty() {
                self.classifier.backend = backend.trim().to_string();
            }
        }
        if let Ok(classes) = std::env::var("SORTER_STUB_CLASSES") {
            self.classifier.stub_classes = split_csv(&classes);
        }
        if let Ok(confidence) = std::env::var("SORTER_CONFIDENCE") {
            self.resolver.confidence_threshold = confidence
                .trim()
                .parse()
                .map_err(|_| anyhow!("SORTER_CONFIDENCE must be a number between 0 and 1"))?;
        }
        if let Ok(milk) = std::env::var("SORTER_MILK_CATEGORY") {
            if !milk.trim().is_empty() {
                self.resolver.milk_category = milk.parse::<MilkMapping>()?;
            }
        }
        if let Ok(sound) = std::env::var("SORTER_SOUND") {
            self.audio.enabled = parse_switch(&sound)
                .ok_or_else(|| anyhow!("SORTER_SOUND must be on/off, true/false or 1/0"))?;
        }
        if let Ok(countdown) = std::env::var("SORTER_COUNTDOWN_SECS") {
            self.timing.countdown_secs = countdown.trim().parse().map_err(|_| {
                anyhow!("SORTER_COUNTDOWN_SECS must be an integer number of seconds")
            })?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        let confidence = self.resolver.confidence_threshold;
        if !(confidence > 0.0 && confidence <= 1.0) {
            return Err(anyhow!(
                "confidence threshold must be in (0, 1], got {}",
                confidence
            ));
        }
        if !(self.classifier.iou_threshold > 0.0 && self.classifier.iou_threshold <= 1.0) {
            return Err(anyhow!("iou threshold must be in (0, 1]"));
        }
        if self.classifier.class_names.is_empty() {
            return Err(anyhow!("classifier class_names must not be empty"));
        }
        self.classifier.backend = self.classifier.backend.to_ascii_lowercase();

        let mut seen = HashSet::new();
        for pin in std::iter::once(self.gpio.trigger_pin).chain(self.gpio.output_pins()) {
            if !seen.insert(pin) {
                return Err(anyhow!("gpio pin {} is assigned more than once", pin));
            }
        }

        if self.camera.target_fps == 0 {
            return Err(anyhow!("camera target_fps must be greater than zero"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera width and height must be greater than zero"));
        }
        if self.timing.pulse_up.is_zero() || self.timing.pulse_down.is_zero() {
            return Err(anyhow!("motor pulse durations must be greater than zero"));
        }
        if self.timing.poll_interval.is_zero() {
            return Err(anyhow!("poll interval must be greater than zero"));
        }
        if self.timing.countdown_secs == 0 {
            return Err(anyhow!("countdown must be greater than zero"));
        }
        if self.audio.enabled && self.audio.player.split_whitespace().next().is_none() {
            return Err(anyhow!("audio player command must not be empty"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<SorterConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

fn parse_switch(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "on" | "true" | "yes" => Some(true),
        "0" | "off" | "false" | "no" => Some(false),
        _ => None,
    }
}
