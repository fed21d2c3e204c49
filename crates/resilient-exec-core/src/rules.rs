//! Rule-driven classification of raw task errors into [`TypedError`]s.
//!
//! A raw task error in this crate is always wrapped in a [`RawError`] before
//! it reaches a rule. [`Rule::classify`] downcasts it to whatever concrete
//! type the rule cares about and either produces a [`TypedError`] or
//! declines by returning `None`.

use crate::error::{ErrorCode, TypedError};
use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// A raw task error, erased for two purposes at once: [`RawError::as_error`]
/// for downcasting during classification, and [`RawError::to_cause`] /
/// [`RawError::to_any`] for attaching the original value to a
/// [`TypedError`] without losing it. Both views share one allocation, so
/// cloning either is a cheap refcount bump rather than a copy of the error.
pub struct RawError {
    as_error: Arc<dyn StdError + Send + Sync + 'static>,
    as_any: Arc<dyn Any + Send + Sync>,
}

impl RawError {
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        let arc = Arc::new(error);
        RawError {
            as_error: arc.clone(),
            as_any: arc,
        }
    }

    pub fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.as_error
    }

    /// A cheap clone suitable for [`TypedError::cause`].
    pub fn to_cause(&self) -> Arc<dyn StdError + Send + Sync> {
        self.as_error.clone()
    }

    /// A cheap clone suitable for [`TypedError::raw`].
    pub fn to_any(&self) -> Arc<dyn Any + Send + Sync> {
        self.as_any.clone()
    }
}

/// A classification rule. Implementors downcast `raw` to a concrete error
/// type and either classify it or decline by returning `None`.
pub trait Rule: Send + Sync {
    fn classify(&self, raw: &RawError) -> Option<TypedError>;

    /// The code this rule always produces, if it can be determined without
    /// running the rule — used by [`Normalizer::build`] to reject two rules
    /// that statically advertise the same code.
    fn static_code(&self) -> Option<ErrorCode> {
        None
    }
}

impl<F> Rule for F
where
    F: Fn(&RawError) -> Option<TypedError> + Send + Sync,
{
    fn classify(&self, raw: &RawError) -> Option<TypedError> {
        self(raw)
    }
}

/// Cooperative-cancellation marker. Tasks that observe their cancellation
/// token firing and choose to unwind early should return this; the engine's
/// own per-attempt cancellation path constructs it too, so both paths
/// normalize identically.
#[derive(Debug, Default)]
pub struct Aborted(pub String);

impl fmt::Display for Aborted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "aborted")
        } else {
            write!(f, "aborted: {}", self.0)
        }
    }
}

impl StdError for Aborted {}

/// Marker for a deadline that elapsed, recognized by the built-in `timeout`
/// rule. The single-task engine constructs this itself when its per-attempt
/// timeout fires; tasks wrapping their own nested deadlines may also return
/// it to get the same classification.
#[derive(Debug, Default)]
pub struct TimedOut(pub String);

impl fmt::Display for TimedOut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "timed out")
        } else {
            write!(f, "timed out: {}", self.0)
        }
    }
}

impl StdError for TimedOut {}

/// An error carrying an HTTP-like status code, recognized by the built-in
/// `http` rule.
#[derive(Debug)]
pub struct HttpStatusError {
    pub status: u16,
    pub message: String,
}

impl fmt::Display for HttpStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "http {}: {}", self.status, self.message)
    }
}

impl StdError for HttpStatusError {}

impl HttpStatusError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        HttpStatusError {
            status,
            message: message.into(),
        }
    }
}

/// Implement this to let [`instance`] classify a concrete error type without
/// a separate mapper closure — sugar over a type-check-and-convert rule,
/// since Rust has no runtime constructor-based dispatch to hang it on.
pub trait ClassifiableError: StdError + 'static {
    fn to_typed_error(&self) -> TypedError;
}

struct PredicateRule<P, M> {
    predicate: P,
    mapper: M,
}

impl<P, M> Rule for PredicateRule<P, M>
where
    P: Fn(&RawError) -> bool + Send + Sync,
    M: Fn(&RawError) -> TypedError + Send + Sync,
{
    fn classify(&self, raw: &RawError) -> Option<TypedError> {
        if (self.predicate)(raw) {
            Some((self.mapper)(raw))
        } else {
            None
        }
    }
}

/// Entry point for the `when(predicate).to_error(mapper)` /
/// `when(predicate).to_code(code).with(body)` rule builders.
pub fn when<P>(predicate: P) -> WhenBuilder<P>
where
    P: Fn(&RawError) -> bool + Send + Sync + 'static,
{
    WhenBuilder { predicate }
}

pub struct WhenBuilder<P> {
    predicate: P,
}

impl<P> WhenBuilder<P>
where
    P: Fn(&RawError) -> bool + Send + Sync + 'static,
{
    /// Full control: the mapper produces the entire [`TypedError`].
    pub fn to_error<M>(self, mapper: M) -> impl Rule
    where
        M: Fn(&RawError) -> TypedError + Send + Sync + 'static,
    {
        PredicateRule {
            predicate: self.predicate,
            mapper,
        }
    }

    /// Declares a static code up front, then fills in the rest of the body.
    /// The declared code is reported by [`Rule::static_code`], enabling
    /// duplicate-code detection at [`Normalizer::build`] time.
    pub fn to_code(self, code: ErrorCode) -> CodeBuilder<P> {
        CodeBuilder {
            predicate: self.predicate,
            code,
        }
    }
}

pub struct CodeBuilder<P> {
    predicate: P,
    code: ErrorCode,
}

/// Everything [`TypedError`] needs except `code` — `cause` and `raw` default
/// to the original raw value when left `None`, which is the common case;
/// set them explicitly only to attach something other than the raw error
/// itself (e.g. an inner cause unwrapped from it).
#[derive(Default)]
pub struct ErrorBody {
    pub message: Option<String>,
    pub meta: serde_json::Map<String, serde_json::Value>,
    pub status: Option<u16>,
    pub retryable: Option<bool>,
    pub cause: Option<Arc<dyn StdError + Send + Sync>>,
    pub raw: Option<Arc<dyn Any + Send + Sync>>,
    pub path: Option<String>,
    pub title: Option<String>,
}

impl<P> CodeBuilder<P>
where
    P: Fn(&RawError) -> bool + Send + Sync + 'static,
{
    pub fn with<B>(self, body: B) -> impl Rule
    where
        B: Fn(&RawError) -> ErrorBody + Send + Sync + 'static,
    {
        CodeRule {
            predicate: self.predicate,
            code: self.code,
            body,
        }
    }
}

struct CodeRule<P, B> {
    predicate: P,
    code: ErrorCode,
    body: B,
}

impl<P, B> Rule for CodeRule<P, B>
where
    P: Fn(&RawError) -> bool + Send + Sync,
    B: Fn(&RawError) -> ErrorBody + Send + Sync,
{
    fn classify(&self, raw: &RawError) -> Option<TypedError> {
        if !(self.predicate)(raw) {
            return None;
        }
        let body = (self.body)(raw);
        let retryable = body
            .retryable
            .unwrap_or_else(|| TypedError::default_retryable_for(&self.code));
        let mut err = TypedError::new(
            self.code.clone(),
            body.message.unwrap_or_else(|| raw.as_error().to_string()),
        )
        .retryable(retryable)
        .meta(body.meta)
        .cause(body.cause.unwrap_or_else(|| raw.to_cause()))
        .raw(body.raw.unwrap_or_else(|| raw.to_any()));
        if let Some(status) = body.status {
            err = err.status(status);
        }
        if let Some(path) = body.path {
            err = err.path(path);
        }
        if let Some(title) = body.title {
            err = err.title(title);
        }
        Some(err)
    }

    fn static_code(&self) -> Option<ErrorCode> {
        Some(self.code.clone())
    }
}

/// `instance::<C>()` — sugar for `when(|e| e.downcast_ref::<C>().is_some())`
/// that also offers `C`'s own [`ClassifiableError`] classification as the
/// default when no mapper is supplied.
pub fn instance<C: ClassifiableError>() -> InstanceRule<C> {
    InstanceRule {
        _marker: std::marker::PhantomData,
    }
}

pub struct InstanceRule<C> {
    _marker: std::marker::PhantomData<C>,
}

impl<C: ClassifiableError> Rule for InstanceRule<C> {
    fn classify(&self, raw: &RawError) -> Option<TypedError> {
        raw.as_error().downcast_ref::<C>().map(|c| c.to_typed_error())
    }
}

impl<C: ClassifiableError> InstanceRule<C> {
    pub fn to_error<M>(self, mapper: M) -> impl Rule
    where
        M: Fn(&C) -> TypedError + Send + Sync + 'static,
    {
        move |raw: &RawError| raw.as_error().downcast_ref::<C>().map(&mapper)
    }
}

/// How user rules combine with the built-ins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RulesMode {
    /// User rules are tried first, then the built-ins (default).
    #[default]
    Extend,
    /// Only user rules are tried; anything left unmatched falls back to
    /// [`ErrorCode::UNKNOWN`] directly, bypassing the built-ins entirely.
    Replace,
}

/// Error returned by [`Normalizer::build`] and the executor's config
/// validation — construction-time failures, never surfaced from `run`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("two rules both statically declare error code {0:?}")]
    DuplicateErrorCode(ErrorCode),
    #[error("jitter ratio must be in 0..=100, got {0}")]
    JitterRatioOutOfRange(f64),
    #[error("exponential backoff factor must be > 1.0, got {0}")]
    InvalidBackoffFactor(f64),
    #[error("circuit breaker half_open_requests must be >= 1")]
    InvalidHalfOpenBudget,
    #[error("circuit breaker failure_threshold must be >= 1")]
    InvalidFailureThreshold,
}

/// The composition of user rules and built-ins that turns any raw task
/// error into a [`TypedError`] — total, it always produces one even when
/// every rule declines, via the `unknown` fallback.
pub struct Normalizer {
    rules: Vec<Arc<dyn Rule>>,
}

impl Normalizer {
    /// Builds a normalizer from user rules plus (depending on `mode`) the
    /// built-in rule set, rejecting duplicate statically-declared codes.
    pub fn build(user_rules: Vec<Arc<dyn Rule>>, mode: RulesMode) -> Result<Self, ConfigError> {
        let mut rules = user_rules;
        if mode == RulesMode::Extend {
            rules.extend(built_in_rules());
        }

        let mut seen = Vec::new();
        for rule in &rules {
            if let Some(code) = rule.static_code() {
                if seen.contains(&code) {
                    return Err(ConfigError::DuplicateErrorCode(code));
                }
                seen.push(code);
            }
        }

        Ok(Normalizer { rules })
    }

    /// Normalizes a raw task error. Never returns without a usable error —
    /// the fallback rule always matches.
    pub fn normalize(&self, raw: &RawError) -> TypedError {
        for rule in &self.rules {
            if let Some(err) = rule.classify(raw) {
                return err;
            }
        }
        fallback(raw)
    }
}

fn fallback(raw: &RawError) -> TypedError {
    TypedError::unknown(raw.as_error().to_string())
}

fn built_in_rules() -> Vec<Arc<dyn Rule>> {
    vec![
        Arc::new(typed_rule as fn(&RawError) -> Option<TypedError>),
        Arc::new(abort_rule as fn(&RawError) -> Option<TypedError>),
        Arc::new(timeout_rule as fn(&RawError) -> Option<TypedError>),
        Arc::new(http_rule as fn(&RawError) -> Option<TypedError>),
        Arc::new(network_rule as fn(&RawError) -> Option<TypedError>),
    ]
}

fn typed_rule(raw: &RawError) -> Option<TypedError> {
    raw.as_error().downcast_ref::<TypedError>().cloned()
}

fn abort_rule(raw: &RawError) -> Option<TypedError> {
    raw.as_error().downcast_ref::<Aborted>().map(|a| TypedError::aborted(a.to_string()))
}

fn timeout_rule(raw: &RawError) -> Option<TypedError> {
    raw.as_error().downcast_ref::<TimedOut>().map(|t| TypedError::timeout(t.to_string()))
}

fn http_rule(raw: &RawError) -> Option<TypedError> {
    raw.as_error().downcast_ref::<HttpStatusError>().map(|h| {
        let retryable = h.status >= 500 || h.status == 429;
        TypedError::new(ErrorCode::HTTP, h.message.clone())
            .status(h.status)
            .retryable(retryable)
    })
}

const NETWORK_IO_KINDS: &[std::io::ErrorKind] = &[
    std::io::ErrorKind::ConnectionReset,
    std::io::ErrorKind::ConnectionRefused,
    std::io::ErrorKind::ConnectionAborted,
    std::io::ErrorKind::TimedOut,
    std::io::ErrorKind::NotConnected,
];

/// Message-substring fallback for network errors that aren't a recognized
/// `std::io::ErrorKind` — brittle by design, documented as such; callers
/// needing stricter matching should supply their own rule ahead of the
/// built-ins rather than have this one tightened globally.
fn network_rule(raw: &RawError) -> Option<TypedError> {
    if let Some(io_err) = raw.as_error().downcast_ref::<std::io::Error>() {
        if NETWORK_IO_KINDS.contains(&io_err.kind()) {
            return Some(TypedError::new(ErrorCode::NETWORK, io_err.to_string()).retryable(true));
        }
    }

    let message = raw.as_error().to_string().to_lowercase();
    if message.contains("fetch failed") || message.contains("network") {
        return Some(TypedError::new(ErrorCode::NETWORK, raw.as_error().to_string()).retryable(true));
    }

    None
}
