//! The normalized error shape every failed attempt is funneled through.
//!
//! [`TypedError`] carries an open "stable codes + user codes" union:
//! [`ErrorCode`] wraps a `Cow<'static, str>` so built-in codes stay
//! `'static` and cheap to compare, while rules are free to mint new codes
//! at runtime without touching a closed enum.

use std::any::Any;
use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// An open-sum error classification code.
///
/// Built-in codes are exposed as associated constants. User [`Rule`](crate::rules::Rule)s
/// may introduce arbitrary new codes via [`ErrorCode::new`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ErrorCode(Cow<'static, str>);

impl ErrorCode {
    pub const ABORTED: ErrorCode = ErrorCode(Cow::Borrowed("ABORTED"));
    pub const TIMEOUT: ErrorCode = ErrorCode(Cow::Borrowed("TIMEOUT"));
    pub const NETWORK: ErrorCode = ErrorCode(Cow::Borrowed("NETWORK"));
    pub const HTTP: ErrorCode = ErrorCode(Cow::Borrowed("HTTP"));
    pub const CIRCUIT_OPEN: ErrorCode = ErrorCode(Cow::Borrowed("CIRCUIT_OPEN"));
    pub const VALIDATION: ErrorCode = ErrorCode(Cow::Borrowed("VALIDATION"));
    pub const UNKNOWN: ErrorCode = ErrorCode(Cow::Borrowed("UNKNOWN"));

    /// Mints a user-defined code. Prefer a `'static` string literal so the
    /// code is cheap to clone and compare, matching the built-ins.
    pub fn new(code: impl Into<Cow<'static, str>>) -> Self {
        ErrorCode(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for ErrorCode {
    fn from(value: &'static str) -> Self {
        ErrorCode::new(value)
    }
}

/// A normalized, non-throwing failure description.
///
/// Every value a task rejects with — a panic payload, an `io::Error`, an
/// application enum — passes through a [`Normalizer`](crate::rules::Normalizer)
/// and comes out as one of these. Construction is always total: there is no
/// raw value the fallback can't wrap as [`ErrorCode::UNKNOWN`].
pub struct TypedError {
    pub code: ErrorCode,
    pub message: String,
    pub meta: serde_json::Map<String, serde_json::Value>,
    pub status: Option<u16>,
    pub retryable: bool,
    pub cause: Option<Arc<dyn StdError + Send + Sync>>,
    pub raw: Option<Arc<dyn Any + Send + Sync>>,
    pub path: Option<String>,
    pub title: Option<String>,
    pub timestamp: Instant,
}

impl TypedError {
    /// Builds a new typed error, stamping `timestamp` at construction time.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        TypedError {
            code,
            message: message.into(),
            meta: serde_json::Map::new(),
            status: None,
            retryable: false,
            cause: None,
            raw: None,
            path: None,
            title: None,
            timestamp: Instant::now(),
        }
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn cause(mut self, cause: Arc<dyn StdError + Send + Sync>) -> Self {
        self.cause = Some(cause);
        self
    }

    pub fn raw(mut self, raw: Arc<dyn Any + Send + Sync>) -> Self {
        self.raw = Some(raw);
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn meta(mut self, meta: serde_json::Map<String, serde_json::Value>) -> Self {
        self.meta = meta;
        self
    }

    /// The default retryability for a recognized code. `HTTP` needs the
    /// status to decide, so this only covers the status-independent codes;
    /// callers building an `HTTP` typed error must set `retryable`
    /// explicitly.
    pub fn default_retryable_for(code: &ErrorCode) -> bool {
        matches!(*code, ErrorCode::TIMEOUT | ErrorCode::NETWORK)
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        TypedError::new(ErrorCode::ABORTED, message).retryable(false)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        TypedError::new(ErrorCode::TIMEOUT, message).retryable(true)
    }

    pub fn circuit_open(message: impl Into<String>) -> Self {
        TypedError::new(ErrorCode::CIRCUIT_OPEN, message).retryable(false)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        TypedError::new(ErrorCode::UNKNOWN, message).retryable(true)
    }
}

impl fmt::Debug for TypedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedError")
            .field("code", &self.code)
            .field("message", &self.message)
            .field("status", &self.status)
            .field("retryable", &self.retryable)
            .field("path", &self.path)
            .field("title", &self.title)
            .finish_non_exhaustive()
    }
}

impl Clone for TypedError {
    fn clone(&self) -> Self {
        TypedError {
            code: self.code.clone(),
            message: self.message.clone(),
            meta: self.meta.clone(),
            status: self.status,
            retryable: self.retryable,
            cause: self.cause.clone(),
            raw: self.raw.clone(),
            path: self.path.clone(),
            title: self.title.clone(),
            timestamp: self.timestamp,
        }
    }
}

impl fmt::Display for TypedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl StdError for TypedError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause.as_ref().map(|c| c.as_ref() as &(dyn StdError + 'static))
    }
}

/// One retry decision, appended to [`crate::Metrics::retry_history`] before
/// the corresponding sleep.
#[derive(Debug, Clone)]
pub struct RetryHistoryEntry {
    pub attempt: u32,
    pub error: TypedError,
    pub delay: Duration,
    /// Elapsed time since the call started when this retry was scheduled.
    pub elapsed: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_constants_compare_by_value() {
        assert_eq!(ErrorCode::TIMEOUT, ErrorCode::new("TIMEOUT"));
        assert_ne!(ErrorCode::TIMEOUT, ErrorCode::ABORTED);
    }

    #[test]
    fn user_codes_are_open() {
        let code = ErrorCode::new("RATE_LIMITED");
        assert_eq!(code.as_str(), "RATE_LIMITED");
    }

    #[test]
    fn typed_error_display_includes_code_and_message() {
        let err = TypedError::new(ErrorCode::HTTP, "not found").status(404);
        assert_eq!(err.to_string(), "[HTTP] not found");
        assert_eq!(err.status, Some(404));
    }

    #[test]
    fn default_retryable_matches_spec_table() {
        assert!(TypedError::default_retryable_for(&ErrorCode::TIMEOUT));
        assert!(TypedError::default_retryable_for(&ErrorCode::NETWORK));
        assert!(!TypedError::default_retryable_for(&ErrorCode::ABORTED));
        assert!(!TypedError::default_retryable_for(&ErrorCode::VALIDATION));
    }
}
