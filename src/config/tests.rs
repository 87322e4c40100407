//! Integration tests for Config loading, validation, and compilation.

use super::*;
use crate::error::ConfigError;
use serial_test::serial;
use std::path::PathBuf;
use std::time::Duration;

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn error_messages(errors: &[ConfigError]) -> Vec<String> {
    errors.iter().map(|e| e.to_string()).collect()
}

// ============================================================
// Config Loading Tests
// ============================================================

#[test]
fn load_valid_config() {
    let config = Config::load(&fixture_path("config_valid.yaml")).unwrap();

    assert_eq!(config.timezone, "America/Argentina/Buenos_Aires");
    match &config.store {
        StoreConfig::JsonDir { path } => assert_eq!(path, &PathBuf::from("tests/fixtures/store")),
    }
    match &config.transport {
        TransportConfig::Smtp(smtp) => {
            assert_eq!(smtp.host, "smtp.example.com");
            assert_eq!(smtp.port, 587);
            assert_eq!(smtp.tls, TlsMode::Starttls);
        }
        other => panic!("Expected smtp transport, got {:?}", other),
    }

    let dispatch = &config.dispatch;
    assert_eq!(dispatch.sender_email.as_deref(), Some("RRHH <rrhh@example.com>"));
    assert_eq!(dispatch.max_concurrent_rules, 8);
    assert_eq!(dispatch.send_timeout, Duration::from_secs(15));
    assert_eq!(dispatch.max_attempts, 2);
    assert_eq!(dispatch.layout_template_file.as_deref(), Some("layout.html.j2"));
    assert!(dispatch.ledger_path.is_none());
    assert_eq!(
        config.metrics.textfile_path,
        Some(PathBuf::from("/tmp/hrnotify.prom"))
    );
    assert_eq!(config.config_dir, fixture_path(""));
}

#[test]
fn load_minimal_config_applies_defaults() {
    let config = Config::load(&fixture_path("config_minimal.yaml")).unwrap();

    assert_eq!(config.timezone, "UTC");
    assert!(matches!(config.transport, TransportConfig::Log));
    assert!(config.dispatch.sender_email.is_none());
    assert_eq!(config.dispatch.max_concurrent_rules, 4);
    assert_eq!(config.dispatch.send_timeout, Duration::from_secs(30));
    assert_eq!(config.dispatch.max_attempts, 3);
    assert!(config.dispatch.layout_template_file.is_none());
    assert!(config.metrics.textfile_path.is_none());
}

#[test]
fn load_nonexistent_file_returns_load_error() {
    let result = Config::load(std::path::Path::new("/nonexistent/path/config.yaml"));
    match result.unwrap_err() {
        ConfigError::LoadError(msg) => {
            assert!(msg.contains("/nonexistent/path/config.yaml"));
        }
        e => panic!("Expected LoadError, got {:?}", e),
    }
}

#[test]
fn load_invalid_yaml_returns_validation_error() {
    let result = Config::load(&fixture_path("config_invalid_yaml.yaml"));
    match result.unwrap_err() {
        ConfigError::ValidationError(_) => {}
        e => panic!("Expected ValidationError, got {:?}", e),
    }
}

#[test]
fn missing_transport_section_is_rejected() {
    let result = Config::from_yaml("store:\n  type: json_dir\n  path: /data\n");
    let err = result.unwrap_err();
    assert!(err.to_string().contains("transport"));
}

#[test]
fn default_config_path_is_correct() {
    assert_eq!(DEFAULT_CONFIG_PATH, "/etc/hrnotify/config.yaml");
}

#[test]
fn config_example_yaml_is_valid() {
    let example_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("config")
        .join("config.example.yaml");

    let config = Config::load(&example_path).expect("config.example.yaml should be valid");
    assert!(config.validate().is_ok());
}

// ============================================================
// Validation Tests
// ============================================================

#[test]
fn validate_valid_config_passes() {
    let config = Config::load(&fixture_path("config_valid.yaml")).unwrap();
    assert!(config.validate().is_ok(), "{:?}", config.validate());
}

#[test]
fn validate_minimal_config_passes() {
    let config = Config::load(&fixture_path("config_minimal.yaml")).unwrap();
    assert!(config.validate().is_ok());
}

#[test]
fn validate_collects_all_errors() {
    let config = Config::load(&fixture_path("config_invalid_values.yaml")).unwrap();
    let errors = config.validate().unwrap_err();
    let messages = error_messages(&errors);

    let expected = [
        "Mars/Olympus_Mons",
        "host cannot be empty",
        "port cannot be 0",
        "password required when username is set",
        "dispatch.max_concurrent_rules",
        "dispatch.max_attempts",
        "dispatch.send_timeout",
        "dispatch.sender_email",
    ];
    for needle in expected {
        assert!(
            messages.iter().any(|m| m.contains(needle)),
            "missing error containing '{}' in {:?}",
            needle,
            messages
        );
    }
    assert_eq!(errors.len(), expected.len());
}

#[test]
fn validate_rejects_too_many_concurrent_rules() {
    let mut config = Config::load(&fixture_path("config_minimal.yaml")).unwrap();
    config.dispatch.max_concurrent_rules = MAX_CONCURRENT_RULES_LIMIT + 1;
    let errors = config.validate().unwrap_err();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].to_string().contains("max_concurrent_rules"));
}

#[test]
fn validate_invalid_layout_reports_template_error() {
    let config = Config::load(&fixture_path("config_invalid_layout.yaml")).unwrap();
    let errors = config.validate().unwrap_err();
    assert_eq!(errors.len(), 1);
    match &errors[0] {
        ConfigError::InvalidTemplate { name, .. } => {
            assert_eq!(name, "layout_invalid.html.j2");
        }
        e => panic!("Expected InvalidTemplate, got {:?}", e),
    }
}

#[test]
fn validate_missing_layout_file_is_reported() {
    let mut config = Config::load(&fixture_path("config_minimal.yaml")).unwrap();
    config.dispatch.layout_template_file = Some("nope.j2".to_string());
    let errors = config.validate().unwrap_err();
    assert!(errors[0].to_string().contains("not found"));
}

#[test]
#[serial]
fn validate_http_api_requires_token_variable() {
    temp_env::with_var("HRNOTIFY_TEST_API_TOKEN", None::<&str>, || {
        let config = Config::load(&fixture_path("config_http_api.yaml")).unwrap();
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 1);
        match &errors[0] {
            ConfigError::InvalidTransport { kind, message } => {
                assert_eq!(kind, "http_api");
                assert!(message.contains("HRNOTIFY_TEST_API_TOKEN"));
            }
            e => panic!("Expected InvalidTransport, got {:?}", e),
        }
    });
}

#[test]
#[serial]
fn validate_http_api_passes_with_token_variable() {
    temp_env::with_var("HRNOTIFY_TEST_API_TOKEN", Some("ya29.token"), || {
        let config = Config::load(&fixture_path("config_http_api.yaml")).unwrap();
        assert!(config.validate().is_ok());
    });
}

#[test]
fn validate_http_api_rejects_non_http_url() {
    let config = Config::from_yaml(
        "store: {type: json_dir, path: /data}\n\
         transport: {type: http_api, url: 'ftp://mail.example.com'}\n",
    )
    .unwrap();
    let errors = config.validate().unwrap_err();
    assert!(errors[0].to_string().contains("unsupported URL scheme"));
}

// ============================================================
// Compile Tests
// ============================================================

#[test]
fn compile_parses_timezone_and_loads_layout() {
    let config = Config::load(&fixture_path("config_valid.yaml")).unwrap();
    let runtime = config.compile().unwrap();

    assert_eq!(runtime.timezone, chrono_tz::America::Argentina::Buenos_Aires);
    let layout = runtime.layout_source.unwrap();
    assert!(layout.contains("{{ body }}"));
    assert_eq!(runtime.dispatch.max_attempts, 2);
}

#[test]
fn compile_without_layout() {
    let config = Config::load(&fixture_path("config_minimal.yaml")).unwrap();
    let runtime = config.compile().unwrap();
    assert_eq!(runtime.timezone, chrono_tz::UTC);
    assert!(runtime.layout_source.is_none());
}

#[test]
fn compile_rejects_invalid_timezone() {
    let mut config = Config::load(&fixture_path("config_minimal.yaml")).unwrap();
    config.timezone = "Nowhere/Land".to_string();
    assert!(config.compile().is_err());
}
