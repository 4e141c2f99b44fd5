// Error handling tests
// Author: kelexine (https://github.com/kelexine)

use semantic_stream::error::ClientError;
use std::time::Duration;

#[test]
fn test_error_display_messages() {
    let errors = vec![
        ClientError::Embedding("timeout".to_string()),
        ClientError::Transport("reset".to_string()),
        ClientError::MalformedEvent("bad line".to_string()),
        ClientError::Persistence("disk full".to_string()),
        ClientError::Busy,
        ClientError::Cancelled,
        ClientError::Timeout(Duration::from_secs(300)),
        ClientError::Config("bad value".to_string()),
    ];

    for error in errors {
        let display = format!("{}", error);
        assert!(!display.is_empty(), "Error should have display message");
    }
}

#[test]
fn test_upstream_error_message() {
    let error = ClientError::Upstream {
        status: 503,
        body: "overloaded".to_string(),
    };
    let display = format!("{}", error);
    assert!(display.contains("503"));
    assert!(display.contains("overloaded"));
}

#[test]
fn test_retries_exhausted_message() {
    let error = ClientError::RetriesExhausted {
        attempts: 3,
        last_error: "connection reset".to_string(),
    };
    let display = format!("{}", error);
    assert!(display.contains("3 attempts"));
    assert!(display.contains("connection reset"));
}

#[test]
fn test_dimension_mismatch_message() {
    let error = ClientError::DimensionMismatch {
        expected: 1536,
        actual: 768,
    };
    assert!(format!("{}", error).contains("1536"));
}

#[test]
fn test_retryable_classification() {
    assert!(ClientError::Transport("reset".to_string()).is_retryable());
    for status in [408, 429, 500, 502, 503, 504] {
        let error = ClientError::Upstream {
            status,
            body: String::new(),
        };
        assert!(error.is_retryable(), "{} should be retryable", status);
    }

    for status in [400, 401, 403, 404, 422] {
        let error = ClientError::Upstream {
            status,
            body: String::new(),
        };
        assert!(!error.is_retryable(), "{} should not be retryable", status);
    }

    assert!(!ClientError::Busy.is_retryable());
    assert!(!ClientError::Cancelled.is_retryable());
    assert!(!ClientError::Embedding("x".to_string()).is_retryable());
    assert!(!ClientError::MalformedEvent("x".to_string()).is_retryable());
}

#[test]
fn test_io_error_conversion() {
    let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "peer reset");
    let error: ClientError = io.into();
    assert!(error.is_retryable());
    assert_eq!(error.kind(), "transport");
}

#[test]
fn test_kind_labels() {
    assert_eq!(ClientError::Busy.kind(), "busy");
    assert_eq!(ClientError::Timeout(Duration::from_secs(1)).kind(), "timeout");
    assert_eq!(
        ClientError::RetriesExhausted {
            attempts: 3,
            last_error: String::new()
        }
        .kind(),
        "retries_exhausted"
    );
}
