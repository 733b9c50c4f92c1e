//! Unit tests for the application error type.

use session_fleet::AppError;

#[test]
fn display_includes_kind_prefix() {
    assert_eq!(
        AppError::Busy("op in flight".into()).to_string(),
        "busy: op in flight"
    );
    assert_eq!(
        AppError::IllegalTransition("created -> stopped".into()).to_string(),
        "illegal transition: created -> stopped"
    );
    assert_eq!(
        AppError::NotFound("session x".into()).to_string(),
        "not found: session x"
    );
}

#[test]
fn kinds_are_stable() {
    assert_eq!(AppError::Busy(String::new()).kind(), "busy");
    assert_eq!(
        AppError::IllegalTransition(String::new()).kind(),
        "illegal_transition"
    );
    assert_eq!(AppError::Launch(String::new()).kind(), "launch");
    assert_eq!(AppError::Provisioning(String::new()).kind(), "provisioning");
    assert_eq!(AppError::NotFound(String::new()).kind(), "not_found");
}

#[test]
fn transient_errors_are_retryable() {
    assert!(AppError::Busy(String::new()).retryable());
    assert!(AppError::Launch(String::new()).retryable());
    assert!(AppError::Termination(String::new()).retryable());
}

#[test]
fn terminal_errors_are_not_retryable() {
    assert!(!AppError::IllegalTransition(String::new()).retryable());
    assert!(!AppError::Provisioning(String::new()).retryable());
    assert!(!AppError::NotFound(String::new()).retryable());
    assert!(!AppError::Invalid(String::new()).retryable());
}

#[test]
fn io_errors_convert() {
    let err: AppError = std::io::Error::other("pipe burst").into();
    assert!(matches!(err, AppError::Io(_)));
    assert!(err.to_string().contains("pipe burst"));
}
