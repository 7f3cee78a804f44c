use serde::Serialize;
use thiserror::Error;

/// Bad input. Always the caller's fault and never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("target must not be empty")]
    EmptyTarget,
    #[error("invalid port specification: {token:?}")]
    InvalidPortSpec { token: String },
    #[error("could not resolve host {host}")]
    UnresolvableHost { host: String },
    #[error("unsupported scan protocol {0:?}, expected \"tcp\" or \"udp\"")]
    UnsupportedProtocol(String),
    #[error("unsupported DNS record type {0:?}")]
    UnsupportedRecordType(String),
    #[error("invalid domain name {0:?}")]
    InvalidDomain(String),
}

impl ValidationError {
    pub(crate) fn port_token(token: &str) -> Self {
        ValidationError::InvalidPortSpec {
            token: token.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupErrorKind {
    Timeout,
    ConnectionFailed,
    NxDomain,
    Protocol,
    Resolver,
}

/// Transport or protocol failure against a WHOIS or DNS server.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind:?}: {message}")]
pub struct LookupError {
    pub kind: LookupErrorKind,
    pub message: String,
}

impl LookupError {
    pub fn new(kind: LookupErrorKind, message: impl Into<String>) -> Self {
        LookupError {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(LookupErrorKind::Timeout, message)
    }

    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::new(LookupErrorKind::ConnectionFailed, message)
    }
}

/// Socket-level failure while probing a single port.
#[derive(Error, Debug)]
#[error("probe of port {port} failed: {source}")]
pub struct ProbeError {
    pub port: u16,
    #[source]
    pub source: std::io::Error,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(pub String);

/// Failure classes the web boundary reports to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    InvalidInput,
    Upstream,
    Internal,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Validation(_) => ErrorClass::InvalidInput,
            Error::Lookup(_) => ErrorClass::Upstream,
            Error::Config(_) | Error::Internal(_) => ErrorClass::Internal,
        }
    }

    pub fn http_status(&self) -> u16 {
        match self.class() {
            ErrorClass::InvalidInput => 400,
            ErrorClass::Upstream => 502,
            ErrorClass::Internal => 500,
        }
    }
}

impl From<trust_dns_resolver::error::ResolveError> for Error {
    fn from(err: trust_dns_resolver::error::ResolveError) -> Self {
        Error::Internal(format!("resolver setup: {err}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    Resolve,
    Probe,
    Whois,
    Dns,
}

/// A failed stage inside an aggregated scan result.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("{stage:?} stage failed ({kind}): {message}")]
pub struct ScanError {
    pub stage: Stage,
    pub kind: String,
    pub message: String,
}

impl ScanError {
    pub fn from_lookup(stage: Stage, err: LookupError) -> Self {
        ScanError {
            stage,
            kind: format!("{:?}", err.kind),
            message: err.message,
        }
    }

    pub fn deadline(stage: Stage) -> Self {
        ScanError {
            stage,
            kind: format!("{:?}", LookupErrorKind::Timeout),
            message: "request deadline exceeded".to_string(),
        }
    }
}
