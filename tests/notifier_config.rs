use std::sync::Mutex;
use std::time::Duration;

use tempfile::{Builder, NamedTempFile};

use zone_notifier::config::{ConfigOverrides, NotifierConfig, CONFIG_ENV};
use zone_notifier::{NotifierError, Region, SchedulingMode};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        CONFIG_ENV,
        "ZONE_NOTIFIER_MODEL",
        "ZONE_NOTIFIER_DEVICE",
        "ZONE_NOTIFIER_INPUT",
        "ZONE_NOTIFIER_MODE",
        "ZONE_NOTIFIER_THRESHOLD",
        "ZONE_NOTIFIER_PUBLISH_INTERVAL_SECS",
        "MQTT_BROKER_ADDR",
        "MQTT_TOPIC",
        "MQTT_USERNAME",
        "MQTT_PASSWORD",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_json_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "model": {"path": "models/person-detection.onnx", "device": "MULTI:CPU,GPU", "threshold": 0.6},
        "roi": {"x": 40, "y": 30, "w": 200, "h": 120},
        "mqtt": {"broker": "mqtt://broker.lan:1884", "publish_interval_secs": 2},
        "inputs": [{"video": "resources/first.mp4"}, {"video": "resources/entry.mp4"}]
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var(CONFIG_ENV, file.path());
    std::env::set_var("ZONE_NOTIFIER_MODE", "sync");
    std::env::set_var("MQTT_TOPIC", "site/zone-a");

    let cfg = NotifierConfig::load().expect("load config");

    assert_eq!(cfg.model, "models/person-detection.onnx");
    assert_eq!(cfg.device, "MULTI:CPU,GPU");
    assert_eq!(cfg.threshold, 0.6);
    assert_eq!(cfg.region, Region::new(40, 30, 200, 120));
    assert_eq!(cfg.input, "resources/entry.mp4");
    assert_eq!(cfg.mode, SchedulingMode::Sync);
    assert_eq!(cfg.publish_interval, Duration::from_secs(2));
    assert_eq!(cfg.mqtt.broker, "mqtt://broker.lan:1884");
    assert_eq!(cfg.mqtt.topic, "site/zone-a");
    assert_eq!(cfg.mqtt.keep_alive, Duration::from_secs(60));

    clear_env();
}

#[test]
fn loads_toml_file_and_cli_overrides_win() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = r#"
        [model]
        path = "stub://detector"
        mode = "async"

        [roi]
        width = 50
        height = 60

        [[inputs]]
        video = "stub://camera?frames=10"
    "#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");
    std::env::set_var(CONFIG_ENV, file.path());
    std::env::set_var("ZONE_NOTIFIER_DEVICE", "GPU");

    let overrides = ConfigOverrides {
        device: Some("HDDL".to_string()),
        roi_x: Some(5),
        publish_interval_secs: Some(3),
        ..ConfigOverrides::default()
    };
    let cfg = NotifierConfig::load_with(&overrides).expect("load config");

    assert_eq!(cfg.model, "stub://detector");
    assert_eq!(cfg.device, "HDDL");
    assert_eq!(cfg.region, Region::new(5, 0, 50, 60));
    assert_eq!(cfg.input, "stub://camera?frames=10");
    assert_eq!(cfg.publish_interval, Duration::from_secs(3));
    assert_eq!(cfg.mode, SchedulingMode::Async);

    clear_env();
}

#[test]
fn unsupported_device_is_a_configuration_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("ZONE_NOTIFIER_MODEL", "stub://detector");
    std::env::set_var("ZONE_NOTIFIER_INPUT", "stub://camera");
    std::env::set_var("ZONE_NOTIFIER_DEVICE", "MULTI:CPU,TPU");

    let err = NotifierConfig::load().unwrap_err();
    assert!(matches!(err, NotifierError::Configuration(_)));
    assert_eq!(err.exit_code(), 2);

    clear_env();
}

#[test]
fn missing_model_and_bad_numbers_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("ZONE_NOTIFIER_INPUT", "stub://camera");
    assert!(NotifierConfig::load()
        .unwrap_err()
        .to_string()
        .contains("model path is required"));

    std::env::set_var("ZONE_NOTIFIER_MODEL", "stub://detector");
    std::env::set_var("ZONE_NOTIFIER_PUBLISH_INTERVAL_SECS", "soon");
    assert!(NotifierConfig::load().is_err());

    clear_env();
}

#[test]
fn unreadable_config_file_is_reported() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let overrides = ConfigOverrides {
        config_path: Some("/nonexistent/zone-notifier.json".into()),
        ..ConfigOverrides::default()
    };
    let err = NotifierConfig::load_with(&overrides).unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));

    clear_env();
}
