use std::{fmt, net::IpAddr, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{ScanError, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl FromStr for Protocol {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            _ => Err(ValidationError::UnsupportedProtocol(s.to_string())),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => f.write_str("tcp"),
            Protocol::Udp => f.write_str("udp"),
        }
    }
}

/// A validated probe plan. `ports` is non-empty, free of duplicates and kept
/// in the order the caller first listed them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPlan {
    pub target: String,
    pub address: IpAddr,
    pub ports: Vec<u16>,
    pub protocol: Protocol,
}

/// Classification of a single probed port.
///
/// UDP probes cannot tell an open port that stays silent from a filtered one,
/// so silence is always reported as `Filtered`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PortState {
    Open,
    Closed,
    Filtered,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortResult {
    pub port: u16,
    #[serde(rename = "status")]
    pub state: PortState,
    pub service: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WhoisRecord {
    pub domain: String,
    #[serde(rename = "registryDomainID")]
    pub registry_domain_id: Option<String>,
    pub registrar: Option<String>,
    #[serde(rename = "registrarWhoisServer")]
    pub whois_server: Option<String>,
    #[serde(rename = "registrarURL")]
    pub registrar_url: Option<String>,
    #[serde(rename = "creationDate")]
    pub creation_date: Option<String>,
    #[serde(rename = "updatedDate")]
    pub updated_date: Option<String>,
    #[serde(rename = "expiryDate")]
    pub expiry_date: Option<String>,
    pub statuses: Vec<String>,
    #[serde(rename = "nameServers")]
    pub name_servers: Vec<String>,
    pub dnssec: Option<String>,
}

impl WhoisRecord {
    pub fn empty(domain: impl Into<String>) -> Self {
        WhoisRecord {
            domain: domain.into(),
            ..WhoisRecord::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum RecordType {
    #[serde(rename = "A")]
    A,
    #[serde(rename = "AAAA")]
    Aaaa,
    #[serde(rename = "MX")]
    Mx,
    #[serde(rename = "TXT")]
    Txt,
    #[serde(rename = "NS")]
    Ns,
    #[serde(rename = "CNAME")]
    Cname,
    #[serde(rename = "SOA")]
    Soa,
    #[serde(rename = "PTR")]
    Ptr,
    #[serde(rename = "SRV")]
    Srv,
    #[serde(rename = "CAA")]
    Caa,
}

impl RecordType {
    pub const DEFAULT_SET: [RecordType; 5] = [
        RecordType::A,
        RecordType::Aaaa,
        RecordType::Mx,
        RecordType::Txt,
        RecordType::Ns,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Aaaa => "AAAA",
            RecordType::Mx => "MX",
            RecordType::Txt => "TXT",
            RecordType::Ns => "NS",
            RecordType::Cname => "CNAME",
            RecordType::Soa => "SOA",
            RecordType::Ptr => "PTR",
            RecordType::Srv => "SRV",
            RecordType::Caa => "CAA",
        }
    }
}

impl FromStr for RecordType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let record_type = match s.trim().to_ascii_uppercase().as_str() {
            "A" => RecordType::A,
            "AAAA" => RecordType::Aaaa,
            "MX" => RecordType::Mx,
            "TXT" => RecordType::Txt,
            "NS" => RecordType::Ns,
            "CNAME" => RecordType::Cname,
            "SOA" => RecordType::Soa,
            "PTR" => RecordType::Ptr,
            "SRV" => RecordType::Srv,
            "CAA" => RecordType::Caa,
            _ => return Err(ValidationError::UnsupportedRecordType(s.to_string())),
        };
        Ok(record_type)
    }
}

impl TryFrom<String> for RecordType {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DnsRecord {
    #[serde(rename = "type")]
    pub record_type: RecordType,
    pub value: String,
    pub ttl: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortScanRequest {
    pub spec: String,
    pub protocol: Protocol,
}

/// What a caller wants to know about a single target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    pub target: String,
    pub ports: Option<PortScanRequest>,
    pub whois: bool,
    /// `Some(empty)` selects the configured default record types.
    pub dns: Option<Vec<RecordType>>,
}

impl ScanRequest {
    pub fn new(target: impl Into<String>) -> Self {
        ScanRequest {
            target: target.into(),
            ports: None,
            whois: false,
            dns: None,
        }
    }

    pub fn with_ports(mut self, spec: impl Into<String>, protocol: Protocol) -> Self {
        self.ports = Some(PortScanRequest {
            spec: spec.into(),
            protocol,
        });
        self
    }

    pub fn with_whois(mut self) -> Self {
        self.whois = true;
        self
    }

    pub fn with_dns(mut self, types: &[RecordType]) -> Self {
        self.dns = Some(types.to_vec());
        self
    }
}

/// Result slot of one stage in an [`AggregateResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum StageOutcome<T> {
    Completed(T),
    Failed { error: ScanError },
}

impl<T> StageOutcome<T> {
    pub fn completed(&self) -> Option<&T> {
        match self {
            StageOutcome::Completed(value) => Some(value),
            StageOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&ScanError> {
        match self {
            StageOutcome::Completed(_) => None,
            StageOutcome::Failed { error } => Some(error),
        }
    }
}

impl<T> From<Result<T, ScanError>> for StageOutcome<T> {
    fn from(result: Result<T, ScanError>) -> Self {
        match result {
            Ok(value) => StageOutcome::Completed(value),
            Err(error) => StageOutcome::Failed { error },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateResult {
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ports: Option<StageOutcome<Vec<PortResult>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whois: Option<StageOutcome<WhoisRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns: Option<StageOutcome<Vec<DnsRecord>>>,
    pub elapsed_ms: u64,
}
