//! Unit tests for `AppError` display format and wire codes.

use agent_bridge::AppError;

#[test]
fn display_carries_domain_prefix() {
    assert_eq!(AppError::Config("bad".into()).to_string(), "config: bad");
    assert_eq!(AppError::Ipc("bind".into()).to_string(), "ipc: bind");
    assert_eq!(
        AppError::Protocol("malformed message: eof".into()).to_string(),
        "protocol: malformed message: eof"
    );
    assert_eq!(AppError::Engine("crashed".into()).to_string(), "engine: crashed");
    assert_eq!(
        AppError::NotFound("session 's1'".into()).to_string(),
        "not found: session 's1'"
    );
    assert_eq!(
        AppError::AlreadyExists("session 's1'".into()).to_string(),
        "already exists: session 's1'"
    );
}

#[test]
fn error_message_no_trailing_period() {
    let s = AppError::Engine("write failed".into()).to_string();
    assert!(!s.ends_with('.'), "error message must not end with a period: {s}");
}

#[test]
fn wire_codes_are_stable() {
    assert_eq!(AppError::Protocol(String::new()).code(), "malformed_message");
    assert_eq!(AppError::NotFound(String::new()).code(), "session_not_found");
    assert_eq!(AppError::AlreadyExists(String::new()).code(), "session_exists");
    assert_eq!(AppError::Engine(String::new()).code(), "engine_error");
}

#[test]
fn io_error_converts_to_io_variant() {
    let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
    let err = AppError::from(io);
    assert!(matches!(err, AppError::Io(ref msg) if msg.contains("pipe closed")));
}

#[test]
fn toml_error_converts_to_config_variant() {
    let toml_err = toml::from_str::<toml::Value>("=").unwrap_err();
    assert!(matches!(AppError::from(toml_err), AppError::Config(_)));
}
