use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, info};
use trust_dns_resolver::{
    config::{ResolverConfig, ResolverOpts},
    error::{ResolveError, ResolveErrorKind},
    proto::{
        op::ResponseCode,
        rr::{Name, RData, Record, RecordType as WireType},
    },
    system_conf, TokioAsyncResolver,
};

use crate::{
    config::ScanConfig,
    error::{LookupError, LookupErrorKind},
    models::{DnsRecord, RecordType},
};

/// Answers one record type for one name. "No records of this type" is an
/// empty `Ok`, a name that does not exist is a `NxDomain` error.
#[async_trait]
pub trait DnsResolver: Send + Sync {
    async fn lookup(&self, domain: &str, record_type: RecordType)
        -> Result<Vec<DnsRecord>, LookupError>;
}

pub struct TrustDnsResolver {
    resolver: TokioAsyncResolver,
}

impl TrustDnsResolver {
    /// Uses the host's resolver configuration (`/etc/resolv.conf` on unix).
    pub fn system(timeout: Duration) -> Result<Self, ResolveError> {
        let (config, opts) = system_conf::read_system_conf()?;
        Self::with_config(config, opts, timeout)
    }

    pub fn with_config(
        config: ResolverConfig,
        mut opts: ResolverOpts,
        timeout: Duration,
    ) -> Result<Self, ResolveError> {
        opts.timeout = timeout;
        opts.attempts = 1;
        let resolver = TokioAsyncResolver::tokio(config, opts)?;
        Ok(TrustDnsResolver { resolver })
    }
}

#[async_trait]
impl DnsResolver for TrustDnsResolver {
    async fn lookup(
        &self,
        domain: &str,
        record_type: RecordType,
    ) -> Result<Vec<DnsRecord>, LookupError> {
        let wire_type = to_wire(record_type);
        match self.resolver.lookup(domain, wire_type).await {
            Ok(lookup) => Ok(lookup
                .record_iter()
                .filter(|record| record.record_type() == wire_type)
                .filter_map(|record| to_record(record_type, record))
                .collect()),
            Err(err) => match err.kind() {
                ResolveErrorKind::NoRecordsFound { response_code, .. }
                    if *response_code == ResponseCode::NXDomain =>
                {
                    Err(LookupError::new(LookupErrorKind::NxDomain, format!("{domain}: NXDOMAIN")))
                }
                ResolveErrorKind::NoRecordsFound { .. } => Ok(Vec::new()),
                ResolveErrorKind::Timeout => Err(LookupError::timeout(format!(
                    "{record_type} query for {domain} timed out"
                ))),
                ResolveErrorKind::Io(_) | ResolveErrorKind::NoConnections => {
                    Err(LookupError::connection_failed(err.to_string()))
                }
                ResolveErrorKind::Proto(_) => {
                    Err(LookupError::new(LookupErrorKind::Protocol, err.to_string()))
                }
                _ => Err(LookupError::new(LookupErrorKind::Resolver, err.to_string())),
            },
        }
    }
}

fn to_wire(record_type: RecordType) -> WireType {
    match record_type {
        RecordType::A => WireType::A,
        RecordType::Aaaa => WireType::AAAA,
        RecordType::Mx => WireType::MX,
        RecordType::Txt => WireType::TXT,
        RecordType::Ns => WireType::NS,
        RecordType::Cname => WireType::CNAME,
        RecordType::Soa => WireType::SOA,
        RecordType::Ptr => WireType::PTR,
        RecordType::Srv => WireType::SRV,
        RecordType::Caa => WireType::CAA,
    }
}

fn to_record(record_type: RecordType, record: &Record) -> Option<DnsRecord> {
    Some(DnsRecord {
        record_type,
        value: render(record.data()?),
        ttl: record.ttl(),
    })
}

fn host(name: &Name) -> String {
    name.to_utf8().trim_end_matches('.').to_string()
}

fn render(data: &RData) -> String {
    match data {
        RData::A(address) => address.to_string(),
        RData::AAAA(address) => address.to_string(),
        RData::CNAME(name) | RData::NS(name) | RData::PTR(name) => host(name),
        RData::MX(mx) => format!("{} {}", mx.preference(), host(mx.exchange())),
        RData::TXT(txt) => txt
            .txt_data()
            .iter()
            .map(|chunk| String::from_utf8_lossy(chunk))
            .collect(),
        RData::SOA(soa) => format!(
            "{} {} {} {} {} {} {}",
            host(soa.mname()),
            host(soa.rname()),
            soa.serial(),
            soa.refresh(),
            soa.retry(),
            soa.expire(),
            soa.minimum()
        ),
        RData::SRV(srv) => format!(
            "{} {} {} {}",
            srv.priority(),
            srv.weight(),
            srv.port(),
            host(srv.target())
        ),
        other => other.to_string(),
    }
}

pub struct DnsClient<R> {
    resolver: R,
    timeout: Duration,
    default_types: Vec<RecordType>,
}

impl<R: DnsResolver> DnsClient<R> {
    pub fn new(resolver: R, config: &ScanConfig) -> Self {
        DnsClient {
            resolver,
            timeout: config.dns_timeout(),
            default_types: config.dns_record_types.clone(),
        }
    }

    /// Queries every type independently. Records come back grouped by type in
    /// query order. The call only fails when no type got an answer at all.
    pub async fn query(
        &self,
        domain: &str,
        types: &[RecordType],
    ) -> Result<Vec<DnsRecord>, LookupError> {
        let requested = if types.is_empty() {
            &self.default_types[..]
        } else {
            types
        };
        let mut types: Vec<RecordType> = Vec::with_capacity(requested.len());
        for record_type in requested {
            if !types.contains(record_type) {
                types.push(*record_type);
            }
        }

        let answers = join_all(types.iter().map(|record_type| async move {
            match tokio::time::timeout(self.timeout, self.resolver.lookup(domain, *record_type))
                .await
            {
                Ok(answer) => answer,
                Err(_) => Err(LookupError::timeout(format!(
                    "{record_type} query for {domain} exceeded {:?}",
                    self.timeout
                ))),
            }
        }))
        .await;

        let mut records = Vec::new();
        let mut answered = false;
        let mut failures = Vec::new();
        for (record_type, answer) in types.iter().zip(answers) {
            match answer {
                Ok(found) => {
                    answered = true;
                    debug!(domain, %record_type, count = found.len(), "dns answer");
                    records.extend(found);
                }
                Err(err) => {
                    debug!(domain, %record_type, error = %err, "dns query failed");
                    failures.push(err);
                }
            }
        }

        if !answered {
            let nxdomain = failures
                .iter()
                .position(|err| err.kind == LookupErrorKind::NxDomain);
            let err = match nxdomain {
                Some(index) => failures.swap_remove(index),
                None if !failures.is_empty() => failures.swap_remove(0),
                None => LookupError::new(LookupErrorKind::Resolver, "no record types queried"),
            };
            return Err(err);
        }

        info!(domain, types = types.len(), records = records.len(), "dns query finished");
        Ok(records)
    }
}
