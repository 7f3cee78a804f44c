use std::time::Duration;

use serde::Deserialize;

use crate::{error::ConfigError, models::RecordType};

pub const IANA_WHOIS_SERVER: &str = "whois.iana.org";
pub const WHOIS_PORT: u16 = 43;

/// Every tunable of the scan core. Durations are given in milliseconds when
/// deserialized.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub resolve_timeout_ms: u64,
    pub port_timeout_ms: u64,
    pub concurrency: usize,
    pub whois_timeout_ms: u64,
    pub whois_server: String,
    pub whois_port: u16,
    /// Total number of WHOIS queries per lookup, the first one included.
    pub whois_max_hops: usize,
    pub dns_timeout_ms: u64,
    pub dns_record_types: Vec<RecordType>,
    pub request_deadline_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            resolve_timeout_ms: 5_000,
            port_timeout_ms: 1_500,
            concurrency: 100,
            whois_timeout_ms: 10_000,
            whois_server: IANA_WHOIS_SERVER.to_string(),
            whois_port: WHOIS_PORT,
            whois_max_hops: 2,
            dns_timeout_ms: 5_000,
            dns_record_types: RecordType::DEFAULT_SET.to_vec(),
            request_deadline_ms: 30_000,
        }
    }
}

impl ScanConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let timeouts = [
            ("resolve_timeout_ms", self.resolve_timeout_ms),
            ("port_timeout_ms", self.port_timeout_ms),
            ("whois_timeout_ms", self.whois_timeout_ms),
            ("dns_timeout_ms", self.dns_timeout_ms),
            ("request_deadline_ms", self.request_deadline_ms),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, ms)| *ms == 0) {
            return Err(ConfigError(format!("{name} must be greater than zero")));
        }
        if self.concurrency == 0 {
            return Err(ConfigError("concurrency must be at least 1".into()));
        }
        if self.whois_max_hops == 0 {
            return Err(ConfigError("whois_max_hops must be at least 1".into()));
        }
        if self.dns_record_types.is_empty() {
            return Err(ConfigError("dns_record_types must not be empty".into()));
        }
        if self.whois_server.trim().is_empty() {
            return Err(ConfigError("whois_server must not be empty".into()));
        }
        Ok(())
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }

    pub fn port_timeout(&self) -> Duration {
        Duration::from_millis(self.port_timeout_ms)
    }

    pub fn whois_timeout(&self) -> Duration {
        Duration::from_millis(self.whois_timeout_ms)
    }

    pub fn dns_timeout(&self) -> Duration {
        Duration::from_millis(self.dns_timeout_ms)
    }

    pub fn request_deadline(&self) -> Duration {
        Duration::from_millis(self.request_deadline_ms)
    }
}
