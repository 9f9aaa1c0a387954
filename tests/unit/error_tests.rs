//! Unit tests for `AppError` display format and retry classification.

use outreach_queue::AppError;

#[test]
fn display_uses_lowercase_kind_prefix() {
    let cases = [
        (AppError::Config("bad".into()), "config: bad"),
        (AppError::Db("locked".into()), "db: locked"),
        (AppError::InvalidPayload("x".into()), "invalid payload: x"),
        (AppError::ProspectClosed("7".into()), "prospect closed: 7"),
        (AppError::AlreadyClaimed("3".into()), "already claimed: 3"),
        (AppError::UnknownActionType("nope".into()), "unknown action type: nope"),
        (AppError::Executor("boom".into()), "executor: boom"),
        (AppError::Transport("down".into()), "transport: down"),
        (AppError::ValidationRejected("tone".into()), "validation rejected: tone"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn only_executor_side_errors_are_retryable() {
    assert!(AppError::Executor("x".into()).is_retryable());
    assert!(AppError::Transport("x".into()).is_retryable());
    assert!(AppError::Composition("x".into()).is_retryable());

    assert!(!AppError::InvalidPayload("x".into()).is_retryable());
    assert!(!AppError::ProspectClosed("x".into()).is_retryable());
    assert!(!AppError::AlreadyClaimed("x".into()).is_retryable());
    assert!(!AppError::ValidationRejected("x".into()).is_retryable());
    assert!(!AppError::Db("x".into()).is_retryable());
}

#[test]
fn json_errors_map_to_db() {
    let err: AppError = serde_json::from_str::<serde_json::Value>("{")
        .expect_err("invalid json")
        .into();
    assert!(matches!(err, AppError::Db(ref msg) if msg.starts_with("json:")));
}

#[test]
fn implements_std_error() {
    fn takes_error(_: &dyn std::error::Error) {}
    takes_error(&AppError::Io("disk full".into()));
}
