//! Async network reconnaissance: port scanning, WHOIS and DNS lookups behind
//! one [`Scanner`].

pub mod common_ports;
pub mod config;
pub mod dns;
pub mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod models;
pub mod ports;
pub mod scanner;
pub mod target;
pub mod whois;

pub use config::ScanConfig;
pub use error::{Error, ErrorClass, LookupError, LookupErrorKind, ScanError, Stage, ValidationError};
pub use models::{
    AggregateResult, DnsRecord, PortResult, PortScanRequest, PortState, Protocol, RecordType,
    ScanPlan, ScanRequest, StageOutcome, WhoisRecord,
};
pub use scanner::{Scanner, SystemScanner};

#[cfg(test)]
pub(crate) fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
