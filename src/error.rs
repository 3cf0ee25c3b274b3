//! Error taxonomy for downstream calls.
//!
//! Every expected failure of the subsystem is a [`ServiceError`] tagged with
//! an [`ErrorKind`]. Callers receive `Result<T, ServiceError>` and never a
//! panic for timeouts, outages or misconfiguration.

use std::fmt;
use thiserror::Error;

use crate::degradation::Fallback;

/// Boxed cause carried by a [`ServiceError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Attempt or overall deadline elapsed.
    Timeout,
    /// Connection refused, reset, DNS failure and similar.
    NetworkFailure,
    /// Downstream answered with a non-success status.
    HttpStatus(u16),
    /// Breaker denied the call; no network I/O happened.
    CircuitOpen,
    /// Credentials could not be obtained or were rejected.
    AuthFailure,
    /// Unknown service, invalid options or unusable endpoint URL.
    ConfigError,
}

impl ErrorKind {
    /// Short label used in logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::NetworkFailure => "network_failure",
            ErrorKind::HttpStatus(_) => "http_status",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::AuthFailure => "auth_failure",
            ErrorKind::ConfigError => "config_error",
        }
    }

    /// Misconfiguration rather than an outage; never retried or degraded.
    pub fn is_permanent_config(&self) -> bool {
        matches!(self, ErrorKind::AuthFailure | ErrorKind::ConfigError)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::HttpStatus(code) => write!(f, "http status {}", code),
            other => f.write_str(other.label()),
        }
    }
}

/// A failed call.
#[derive(Debug, Error)]
#[error("{kind}: {message} [correlation_id={correlation_id}, retries={retry_count}]")]
pub struct ServiceError {
    kind: ErrorKind,
    message: String,
    correlation_id: String,
    retry_count: u32,
    #[source]
    source: Option<BoxError>,
    fallback: Option<Fallback>,
}

impl ServiceError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            correlation_id: String::new(),
            retry_count: 0,
            source: None,
            fallback: None,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConfigError, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthFailure, message)
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_context(mut self, correlation_id: &str, retry_count: u32) -> Self {
        self.correlation_id = correlation_id.to_string();
        self.retry_count = retry_count;
        self
    }

    pub(crate) fn with_fallback(mut self, fallback: Fallback) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Degraded result produced for this failure, if degradation ran.
    pub fn fallback(&self) -> Option<&Fallback> {
        self.fallback.as_ref()
    }

    pub fn take_fallback(&mut self) -> Option<Fallback> {
        self.fallback.take()
    }
}

/// Result of a downstream call.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Either the live value or the degraded stand-in served for it.
#[derive(Debug, Clone, PartialEq)]
pub enum Served<T> {
    Live(T),
    Degraded(Fallback),
}

impl<T> Served<T> {
    pub fn is_live(&self) -> bool {
        matches!(self, Served::Live(_))
    }
}

/// Combinators for [`ServiceResult`].
pub trait ServiceResultExt<T> {
    /// Value on success, otherwise whatever `f` derives from the error.
    fn get_or_else<F>(self, f: F) -> T
    where
        F: FnOnce(ServiceError) -> T;

    /// Collapse both arms into one value.
    fn fold<U, S, E>(self, on_success: S, on_error: E) -> U
    where
        S: FnOnce(T) -> U,
        E: FnOnce(ServiceError) -> U;

    /// Turn a degraded failure into [`Served::Degraded`]; failures without a
    /// fallback (permanent errors) stay errors.
    fn recover(self) -> ServiceResult<Served<T>>;
}

impl<T> ServiceResultExt<T> for ServiceResult<T> {
    fn get_or_else<F>(self, f: F) -> T
    where
        F: FnOnce(ServiceError) -> T,
    {
        self.unwrap_or_else(f)
    }

    fn fold<U, S, E>(self, on_success: S, on_error: E) -> U
    where
        S: FnOnce(T) -> U,
        E: FnOnce(ServiceError) -> U,
    {
        match self {
            Ok(value) => on_success(value),
            Err(e) => on_error(e),
        }
    }

    fn recover(self) -> ServiceResult<Served<T>> {
        match self {
            Ok(value) => Ok(Served::Live(value)),
            Err(mut e) => match e.take_fallback() {
                Some(fallback) => Ok(Served::Degraded(fallback)),
                None => Err(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ServiceError::new(ErrorKind::HttpStatus(503), "upstream unavailable")
            .with_context("abc", 2);
        assert_eq!(
            err.to_string(),
            "http status 503: upstream unavailable [correlation_id=abc, retries=2]"
        );
        assert_eq!(err.retry_count(), 2);
    }

    #[test]
    fn test_source_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = ServiceError::new(ErrorKind::NetworkFailure, "connect failed").with_source(io);
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "refused");
    }

    #[test]
    fn test_combinators() {
        let ok: ServiceResult<u32> = Ok(3);
        assert_eq!(ok.fold(|v| v * 2, |_| 0), 6);

        let err: ServiceResult<u32> = Err(ServiceError::config("bad"));
        assert_eq!(err.get_or_else(|e| e.message().len() as u32), 3);
    }

    #[test]
    fn test_recover() {
        let degraded: ServiceResult<u32> = Err(ServiceError::new(ErrorKind::CircuitOpen, "open")
            .with_fallback(Fallback::Unavailable { capability: "match".into() }));
        match degraded.recover().unwrap() {
            Served::Degraded(Fallback::Unavailable { capability }) => assert_eq!(capability, "match"),
            other => panic!("unexpected {:?}", other),
        }

        let permanent: ServiceResult<u32> = Err(ServiceError::auth("rejected"));
        assert_eq!(permanent.recover().unwrap_err().kind(), ErrorKind::AuthFailure);
    }
}
