use super::*;

#[test]
fn config_error_display() {
    let err = AutosignError::Config("bad value".into());
    assert_eq!(err.to_string(), "Configuration error: bad value");
    assert!(!err.is_recoverable());
}

#[test]
fn flood_wait_carries_retry_after() {
    let err = AutosignError::FloodWait { retry_after: 30 };
    assert_eq!(err.retry_after(), Some(30));
    assert_eq!(err.to_string(), "Backend asked to wait 30s");
    assert!(err.is_recoverable());
}

#[test]
fn retries_exhausted_is_not_a_flood_wait() {
    let err = AutosignError::RetriesExhausted {
        attempts: 3,
        retry_after: 12,
    };
    assert_eq!(err.retry_after(), None);
    assert!(err.is_recoverable());
    assert!(!err.is_connection_failure());
}

#[test]
fn unauthorized_is_connection_failure() {
    let err = AutosignError::Unauthorized("session revoked".into());
    assert!(err.is_connection_failure());
    assert!(err.is_recoverable());
}

#[test]
fn backend_error_is_not_connection_failure() {
    let err = AutosignError::Backend("MESSAGE_ID_INVALID".into());
    assert!(!err.is_connection_failure());
}

#[test]
fn internal_from_anyhow() {
    let anyhow_err = anyhow::anyhow!("something broke");
    let err: AutosignError = anyhow_err.into();
    assert!(matches!(err, AutosignError::Internal(_)));
    assert!(err.is_recoverable());
}

#[test]
fn internal_from_io() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
    let err: AutosignError = io.into();
    assert!(matches!(err, AutosignError::Internal(_)));
}
