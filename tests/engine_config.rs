use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use cockade_watch::config::EngineConfig;
use cockade_watch::Facing;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "COCKADE_CONFIG",
        "COCKADE_BACKEND_URL",
        "COCKADE_TARGET_CLASS",
        "COCKADE_AUTH_HEADER",
        "COCKADE_CAPTURE_DEVICE",
        "COCKADE_FACING",
        "COCKADE_POLL_INTERVAL_MS",
        "COCKADE_REQUEST_TIMEOUT_MS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "service": {
            "base_url": "https://detector.internal:9443",
            "token_path": "/v2/token",
            "target_class": "cockade",
            "request_timeout_ms": 1500
        },
        "capture": {
            "device": "http://192.168.1.20/stream",
            "user_device": "stub://selfie",
            "facing": "user",
            "width": 800,
            "height": 600,
            "jpeg_quality": 70
        },
        "polling": {
            "interval_ms": 5000,
            "recent_window": 10
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("COCKADE_CONFIG", file.path());
    std::env::set_var("COCKADE_TARGET_CLASS", "patriota");
    std::env::set_var("COCKADE_POLL_INTERVAL_MS", "750");

    let cfg = EngineConfig::load().expect("load config");

    assert_eq!(cfg.service.base_url, "https://detector.internal:9443");
    assert_eq!(
        cfg.service.token_url().unwrap(),
        "https://detector.internal:9443/v2/token"
    );
    assert_eq!(
        cfg.service.detect_url().unwrap(),
        "https://detector.internal:9443/detect"
    );
    assert_eq!(cfg.service.target_class, "patriota");
    assert_eq!(cfg.service.request_timeout, Some(Duration::from_millis(1500)));
    assert_eq!(cfg.capture.device, "http://192.168.1.20/stream");
    assert_eq!(cfg.capture.user_device.as_deref(), Some("stub://selfie"));
    assert_eq!(cfg.capture.facing, Facing::User);
    assert_eq!((cfg.capture.width, cfg.capture.height), (800, 600));
    assert_eq!(cfg.capture.jpeg_quality, 70);
    assert_eq!(cfg.polling.interval, Duration::from_millis(750));
    assert_eq!(cfg.polling.recent_window, 10);

    clear_env();
}

#[test]
fn toml_files_are_recognised_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
[service]
base_url = "http://10.0.0.5:8000"
auth_header = "X-Session"

[capture]
facing = "environment"
grab_fps = 5
"#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");
    std::env::set_var("COCKADE_CONFIG", file.path());
    std::env::set_var("COCKADE_FACING", "front");

    let cfg = EngineConfig::load().expect("load config");
    assert_eq!(cfg.service.base_url, "http://10.0.0.5:8000");
    assert_eq!(cfg.service.auth_header, "X-Session");
    assert_eq!(cfg.capture.grab_fps, 5);
    assert_eq!(cfg.capture.facing, Facing::User);
    assert_eq!(cfg.polling.interval, Duration::from_millis(2000));

    clear_env();
}

#[test]
fn defaults_apply_without_a_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = EngineConfig::load().expect("load config");
    assert_eq!(cfg.service.base_url, "http://localhost:8000");
    assert_eq!(cfg.service.target_class, "patriota");
    assert_eq!(cfg.capture.facing, Facing::Environment);
    assert_eq!(cfg.polling.recent_window, 5);
}

#[test]
fn rejects_invalid_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("COCKADE_POLL_INTERVAL_MS", "soon");
    assert!(EngineConfig::load().is_err());
    clear_env();

    std::env::set_var("COCKADE_POLL_INTERVAL_MS", "0");
    assert!(EngineConfig::load().is_err());
    clear_env();

    std::env::set_var("COCKADE_BACKEND_URL", "not a url");
    assert!(EngineConfig::load().is_err());
    clear_env();

    std::env::set_var("COCKADE_FACING", "sideways");
    assert!(EngineConfig::load().is_err());
    clear_env();
}
