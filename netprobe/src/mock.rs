//! Scripted stand-ins for the network capabilities, wired into a
//! [`Scanner`](crate::Scanner) in place of the socket and resolver
//! implementations. Compiled for tests and behind the `mock` feature.

use std::{
    collections::HashMap,
    io::ErrorKind,
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    dns::DnsResolver,
    error::{LookupError, ProbeError},
    models::{DnsRecord, PortState, Protocol, RecordType},
    ports::PortProber,
    whois::WhoisTransport,
};

#[derive(Debug, Clone)]
pub enum ProbeScript {
    Answer { delay: Duration, state: PortState },
    Fail(ErrorKind),
    Silent,
}

impl ProbeScript {
    pub fn after(delay: Duration, state: PortState) -> Self {
        ProbeScript::Answer { delay, state }
    }

    pub fn fail(kind: ErrorKind) -> Self {
        ProbeScript::Fail(kind)
    }
}

#[derive(Debug, Default)]
pub struct MockProber {
    scripts: HashMap<u16, ProbeScript>,
    fallback: Option<ProbeScript>,
    gauge: Option<(Arc<AtomicUsize>, Arc<AtomicUsize>, Duration)>,
}

impl MockProber {
    /// Ports without a script answer `Closed` immediately.
    pub fn new(scripts: HashMap<u16, ProbeScript>) -> Self {
        MockProber {
            scripts,
            ..MockProber::default()
        }
    }

    /// Every port swallows the probe, like a firewall dropping packets.
    pub fn silent() -> Self {
        MockProber {
            fallback: Some(ProbeScript::Silent),
            ..MockProber::default()
        }
    }

    /// Answers `Open` after `hold`, tracking how many probes overlap.
    pub fn counting(in_flight: Arc<AtomicUsize>, peak: Arc<AtomicUsize>, hold: Duration) -> Self {
        MockProber {
            gauge: Some((in_flight, peak, hold)),
            ..MockProber::default()
        }
    }
}

#[async_trait]
impl PortProber for MockProber {
    async fn probe(&self, addr: SocketAddr, _protocol: Protocol) -> Result<PortState, ProbeError> {
        if let Some((in_flight, peak, hold)) = &self.gauge {
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(*hold).await;
            in_flight.fetch_sub(1, Ordering::SeqCst);
            return Ok(PortState::Open);
        }

        let script = self
            .scripts
            .get(&addr.port())
            .or(self.fallback.as_ref())
            .cloned()
            .unwrap_or(ProbeScript::Answer {
                delay: Duration::ZERO,
                state: PortState::Closed,
            });

        match script {
            ProbeScript::Answer { delay, state } => {
                tokio::time::sleep(delay).await;
                Ok(state)
            }
            ProbeScript::Fail(kind) => Err(ProbeError {
                port: addr.port(),
                source: std::io::Error::new(kind, "scripted failure"),
            }),
            ProbeScript::Silent => std::future::pending().await,
        }
    }
}

/// Serves canned WHOIS responses per server and records every query.
#[derive(Debug, Default)]
pub struct MockWhois {
    responses: HashMap<String, Result<String, LookupError>>,
    delay: Duration,
    queries: Mutex<Vec<(String, String)>>,
}

impl MockWhois {
    pub fn new() -> Self {
        MockWhois::default()
    }

    pub fn respond(mut self, server: &str, response: &str) -> Self {
        self.responses
            .insert(server.to_string(), Ok(response.to_string()));
        self
    }

    pub fn fail(mut self, server: &str, err: LookupError) -> Self {
        self.responses.insert(server.to_string(), Err(err));
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// `(server, query)` pairs in the order they were issued.
    pub fn queries(&self) -> Vec<(String, String)> {
        self.queries
            .lock()
            .map(|queries| queries.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl WhoisTransport for MockWhois {
    async fn query(&self, server: &str, query: &str) -> Result<String, LookupError> {
        if let Ok(mut queries) = self.queries.lock() {
            queries.push((server.to_string(), query.to_string()));
        }
        tokio::time::sleep(self.delay).await;
        self.responses.get(server).cloned().unwrap_or_else(|| {
            Err(LookupError::connection_failed(format!(
                "no scripted response for {server}"
            )))
        })
    }
}

/// Answers DNS queries from a per-type table; unlisted types have no records.
#[derive(Debug, Default)]
pub struct MockDns {
    answers: HashMap<RecordType, Result<Vec<DnsRecord>, LookupError>>,
    delay: Duration,
}

impl MockDns {
    pub fn new() -> Self {
        MockDns::default()
    }

    pub fn answer(mut self, record_type: RecordType, values: &[(&str, u32)]) -> Self {
        let records = values
            .iter()
            .map(|(value, ttl)| DnsRecord {
                record_type,
                value: value.to_string(),
                ttl: *ttl,
            })
            .collect();
        self.answers.insert(record_type, Ok(records));
        self
    }

    pub fn fail(mut self, record_type: RecordType, err: LookupError) -> Self {
        self.answers.insert(record_type, Err(err));
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl DnsResolver for MockDns {
    async fn lookup(
        &self,
        _domain: &str,
        record_type: RecordType,
    ) -> Result<Vec<DnsRecord>, LookupError> {
        tokio::time::sleep(self.delay).await;
        self.answers
            .get(&record_type)
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}
