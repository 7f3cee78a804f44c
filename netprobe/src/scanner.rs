//! The single entry surface of the crate.
//!
//! A [`Scanner`] is wired once, at construction, to its three network
//! capabilities. [`Scanner::system`] picks the socket and resolver
//! implementations; tests hand in the doubles from [`crate::mock`].

use tokio::time::Instant;
use tracing::{info, instrument};

use crate::{
    config::ScanConfig,
    dns::{DnsClient, DnsResolver, TrustDnsResolver},
    error::{Error, ScanError, Stage, ValidationError},
    models::{
        AggregateResult, DnsRecord, PortResult, Protocol, RecordType, ScanRequest, StageOutcome,
        WhoisRecord,
    },
    ports::{self, PortProber, SocketProber},
    target,
    whois::{TcpWhoisTransport, WhoisClient, WhoisTransport},
};

pub struct Scanner<P, W, D> {
    config: ScanConfig,
    prober: P,
    whois: WhoisClient<W>,
    dns: DnsClient<D>,
}

pub type SystemScanner = Scanner<SocketProber, TcpWhoisTransport, TrustDnsResolver>;

impl SystemScanner {
    /// Real sockets for probing and WHOIS, the host's resolver for DNS.
    pub fn system(config: ScanConfig) -> Result<Self, Error> {
        config.validate()?;
        let resolver = TrustDnsResolver::system(config.dns_timeout())?;
        let transport = TcpWhoisTransport::new(config.whois_port);
        Ok(Scanner::new(config, SocketProber, transport, resolver))
    }
}

impl<P, W, D> Scanner<P, W, D>
where
    P: PortProber,
    W: WhoisTransport,
    D: DnsResolver,
{
    pub fn new(config: ScanConfig, prober: P, whois_transport: W, resolver: D) -> Self {
        let whois = WhoisClient::new(whois_transport, &config);
        let dns = DnsClient::new(resolver, &config);
        Scanner {
            config,
            prober,
            whois,
            dns,
        }
    }

    /// `protocol` is the wire value, `"tcp"` or `"udp"`.
    #[instrument(skip_all, fields(host = %target, ports = %ports_spec, protocol = %protocol))]
    pub async fn scan_ports(
        &self,
        target: &str,
        ports_spec: &str,
        protocol: &str,
    ) -> Result<Vec<PortResult>, ValidationError> {
        let protocol: Protocol = protocol.parse()?;
        let plan =
            target::resolve(target, ports_spec, protocol, self.config.resolve_timeout()).await?;
        Ok(ports::probe(
            &self.prober,
            &plan,
            self.config.port_timeout(),
            self.config.concurrency,
        )
        .await)
    }

    #[instrument(skip_all, fields(host = %target))]
    pub async fn whois(&self, target: &str) -> Result<WhoisRecord, Error> {
        let domain = target::normalize_domain(target)?;
        Ok(self.whois.lookup(&domain).await?)
    }

    /// `None` or an empty slice queries the configured default types.
    #[instrument(skip_all, fields(host = %target))]
    pub async fn dns_records(
        &self,
        target: &str,
        types: Option<&[RecordType]>,
    ) -> Result<Vec<DnsRecord>, Error> {
        let domain = target::normalize_domain(target)?;
        Ok(self.dns.query(&domain, types.unwrap_or_default()).await?)
    }

    /// Runs every requested stage concurrently under the request deadline.
    /// Only invalid input fails the whole call; stage failures land in their
    /// slot of the result.
    #[instrument(skip_all, fields(host = %request.target))]
    pub async fn run(&self, request: &ScanRequest) -> Result<AggregateResult, ValidationError> {
        let started = Instant::now();
        let deadline = started + self.config.request_deadline();

        let plan = match &request.ports {
            Some(ports) => Some(
                target::resolve(
                    &request.target,
                    &ports.spec,
                    ports.protocol,
                    self.config.resolve_timeout(),
                )
                .await?,
            ),
            None => None,
        };
        let domain = if request.whois || request.dns.is_some() {
            Some(target::normalize_domain(&request.target)?)
        } else {
            None
        };

        let ports_stage = async {
            let plan = plan.as_ref()?;
            let results = ports::probe_until(
                &self.prober,
                plan,
                self.config.port_timeout(),
                self.config.concurrency,
                Some(deadline),
            )
            .await;
            Some(StageOutcome::Completed(results))
        };

        let whois_stage = async {
            if !request.whois {
                return None;
            }
            let domain = domain.as_deref()?;
            let outcome = match tokio::time::timeout_at(deadline, self.whois.lookup(domain)).await {
                Ok(lookup) => lookup.map_err(|err| ScanError::from_lookup(Stage::Whois, err)),
                Err(_) => Err(ScanError::deadline(Stage::Whois)),
            };
            Some(StageOutcome::from(outcome))
        };

        let dns_stage = async {
            let types = request.dns.as_deref()?;
            let domain = domain.as_deref()?;
            let outcome = match tokio::time::timeout_at(deadline, self.dns.query(domain, types)).await
            {
                Ok(query) => query.map_err(|err| ScanError::from_lookup(Stage::Dns, err)),
                Err(_) => Err(ScanError::deadline(Stage::Dns)),
            };
            Some(StageOutcome::from(outcome))
        };

        let (ports, whois, dns) = tokio::join!(ports_stage, whois_stage, dns_stage);

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let failed = [
            whois.as_ref().and_then(StageOutcome::error),
            dns.as_ref().and_then(StageOutcome::error),
        ]
        .into_iter()
        .flatten()
        .count();
        info!(elapsed_ms, failed_stages = failed, "scan request finished");

        Ok(AggregateResult {
            target: request.target.trim().to_string(),
            ports,
            whois,
            dns,
            elapsed_ms,
        })
    }
}
