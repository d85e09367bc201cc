use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use bottle_sorter::config::{GpioBackendKind, SorterConfig};
use bottle_sorter::resolve::MilkMapping;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SORTER_CONFIG",
        "SORTER_CAMERA_DEVICE",
        "SORTER_GPIO_BACKEND",
        "SORTER_MODEL_PATH",
        "SORTER_CLASSIFIER",
        "SORTER_STUB_CLASSES",
        "SORTER_CONFIDENCE",
        "SORTER_MILK_CATEGORY",
        "SORTER_SOUND",
        "SORTER_COUNTDOWN_SECS",
    ] {
        std::env::remove_var(key);
    }
}

fn write_temp(contents: &str, suffix: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("temp config");
    std::io::Write::write_all(&mut file, contents.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_match_deployed_station() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = SorterConfig::load().expect("load defaults");

    assert_eq!(cfg.camera.device, "/dev/video0");
    assert_eq!((cfg.camera.width, cfg.camera.height), (1920, 1080));
    assert_eq!(cfg.camera.target_fps, 30);
    assert_eq!(cfg.camera.fourcc, "MJPG");
    assert_eq!(cfg.gpio.backend, GpioBackendKind::Sysfs);
    assert_eq!(cfg.gpio.trigger_pin, 12);
    assert_eq!(cfg.gpio.output_pins(), [4, 17, 27, 22, 5, 6]);
    assert_eq!(cfg.resolver.confidence_threshold, 0.7);
    assert_eq!(cfg.resolver.milk_category, MilkMapping::Yellow);
    assert!(!cfg.resolver.require_cap_signal);
    assert_eq!(cfg.timing.pulse_up, Duration::from_millis(400));
    assert_eq!(cfg.timing.pulse_down, Duration::from_millis(450));
    assert_eq!(cfg.timing.settle, Duration::from_secs(1));
    assert_eq!(cfg.timing.announce_hold, Duration::from_secs(2));
    assert_eq!(cfg.timing.countdown_secs, 5);
    assert_eq!(cfg.classifier.class_names.len(), 10);
    assert!(cfg.audio.enabled);

    clear_env();
}

#[test]
fn loads_json_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_temp(
        r#"{
            "camera": { "device": "stub://bench", "width": 640, "height": 480 },
            "gpio": { "backend": "stub", "trigger_pin": 16 },
            "classifier": { "backend": "stub", "stub_classes": ["Coke"] },
            "resolver": { "milk_category": "green", "require_cap_signal": true },
            "timing": { "settle_ms": 250, "countdown_secs": 3 },
            "audio": { "enabled": false }
        }"#,
        ".json",
    );

    std::env::set_var("SORTER_CONFIG", file.path());
    std::env::set_var("SORTER_CONFIDENCE", "0.55");
    std::env::set_var("SORTER_COUNTDOWN_SECS", "8");

    let cfg = SorterConfig::load().expect("load config");

    assert_eq!(cfg.camera.device, "stub://bench");
    assert_eq!(cfg.camera.width, 640);
    assert_eq!(cfg.camera.target_fps, 30);
    assert_eq!(cfg.gpio.backend, GpioBackendKind::Stub);
    assert_eq!(cfg.gpio.trigger_pin, 16);
    assert_eq!(cfg.classifier.stub_classes, vec!["Coke"]);
    assert_eq!(cfg.resolver.milk_category, MilkMapping::Green);
    assert!(cfg.resolver.require_cap_signal);
    assert_eq!(cfg.resolver.confidence_threshold, 0.55);
    assert_eq!(cfg.timing.settle, Duration::from_millis(250));
    assert_eq!(cfg.timing.countdown_secs, 8);
    assert!(!cfg.audio.enabled);

    clear_env();
}

#[test]
fn loads_toml_file_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_temp(
        r#"
[camera]
device = "bench/bottle.jpg"

[gpio]
backend = "stub"
m3_up = 23
m3_down = 24

[display]
snapshot_path = "out/last.jpg"
"#,
        ".toml",
    );

    let cfg = SorterConfig::load_from(file.path()).expect("load toml");
    assert_eq!(cfg.camera.device, "bench/bottle.jpg");
    assert_eq!((cfg.gpio.m3_up, cfg.gpio.m3_down), (23, 24));
    assert_eq!(cfg.display.snapshot_path.to_str(), Some("out/last.jpg"));

    clear_env();
}

#[test]
fn env_switches_sound_and_milk_mapping() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SORTER_SOUND", "off");
    std::env::set_var("SORTER_MILK_CATEGORY", "GREEN");
    std::env::set_var("SORTER_GPIO_BACKEND", "stub");
    let cfg = SorterConfig::load().expect("load config");
    assert!(!cfg.audio.enabled);
    assert_eq!(cfg.resolver.milk_category, MilkMapping::Green);
    assert_eq!(cfg.gpio.backend, GpioBackendKind::Stub);

    std::env::set_var("SORTER_SOUND", "loud");
    assert!(SorterConfig::load().is_err());

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    for (json, label) in [
        (r#"{ "gpio": { "m1_up": 12 } }"#, "pin shared with trigger"),
        (r#"{ "gpio": { "m2_down": 4 } }"#, "pin shared between motors"),
        (r#"{ "classifier": { "confidence_threshold": 0.0 } }"#, "zero confidence"),
        (r#"{ "classifier": { "confidence_threshold": 1.5 } }"#, "confidence above one"),
        (r#"{ "timing": { "pulse_up_ms": 0 } }"#, "zero pulse"),
        (r#"{ "timing": { "countdown_secs": 0 } }"#, "zero countdown"),
        (r#"{ "camera": { "target_fps": 0 } }"#, "zero fps"),
        (r#"{ "resolver": { "milk_category": "blue" } }"#, "unknown milk bucket"),
        (r#"{ "gpio": { "backend": "wiringpi" } }"#, "unknown gpio backend"),
        (r#"{ "camera": "#, "malformed json"),
    ] {
        let file = write_temp(json, ".json");
        assert!(
            SorterConfig::load_from(file.path()).is_err(),
            "expected rejection: {}",
            label
        );
    }

    std::env::set_var("SORTER_CONFIDENCE", "high");
    assert!(SorterConfig::load().is_err());

    clear_env();
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SORTER_CONFIG", "/nonexistent/sorter.json");
    let err = SorterConfig::load().unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));

    clear_env();
}
