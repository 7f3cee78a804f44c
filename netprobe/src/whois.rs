//! WHOIS (RFC 3912) client.
//!
//! A lookup starts at the registry server for the domain's suffix when one
//! is known, otherwise at the IANA root, and follows referrals until the hop
//! budget runs out. Responses from the root only describe the TLD, so they
//! are used for their referral and never parsed into the record.

use std::{sync::OnceLock, time::Duration};

use async_trait::async_trait;
use regex::Regex;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::Instant,
};
use tracing::{debug, info, warn};

use crate::{config::ScanConfig, error::LookupError, models::WhoisRecord};

/// Upper bound on a single response; real ones are a few KiB.
const MAX_RESPONSE_BYTES: u64 = 1024 * 1024;

const REGISTRY_SERVERS: &[(&str, &str)] = &[
    ("au", "whois.auda.org.au"),
    ("cn", "whois.cnnic.cn"),
    ("com", "whois.verisign-grs.com"),
    ("de", "whois.denic.de"),
    ("edu", "whois.educause.edu"),
    ("fr", "whois.nic.fr"),
    ("gov", "whois.dotgov.gov"),
    ("jp", "whois.jprs.jp"),
    ("net", "whois.verisign-grs.com"),
    ("nl", "whois.domain-registry.nl"),
    ("org", "whois.pir.org"),
    ("uk", "whois.nic.uk"),
];

/// Sends one query to one server and returns the whole response.
#[async_trait]
pub trait WhoisTransport: Send + Sync {
    async fn query(&self, server: &str, query: &str) -> Result<String, LookupError>;
}

#[derive(Debug, Clone)]
pub struct TcpWhoisTransport {
    port: u16,
}

impl TcpWhoisTransport {
    pub fn new(port: u16) -> Self {
        TcpWhoisTransport { port }
    }
}

#[async_trait]
impl WhoisTransport for TcpWhoisTransport {
    async fn query(&self, server: &str, query: &str) -> Result<String, LookupError> {
        let connection_failed =
            |err: std::io::Error| LookupError::connection_failed(format!("{server}: {err}"));

        let mut stream = TcpStream::connect((server, self.port))
            .await
            .map_err(connection_failed)?;
        stream
            .write_all(format!("{query}\r\n").as_bytes())
            .await
            .map_err(connection_failed)?;

        let mut raw = Vec::new();
        (&mut stream)
            .take(MAX_RESPONSE_BYTES)
            .read_to_end(&mut raw)
            .await
            .map_err(connection_failed)?;

        Ok(String::from_utf8_lossy(&raw).into_owned())
    }
}

pub struct WhoisClient<T> {
    transport: T,
    root_server: String,
    timeout: Duration,
    max_hops: usize,
}

impl<T: WhoisTransport> WhoisClient<T> {
    pub fn new(transport: T, config: &ScanConfig) -> Self {
        WhoisClient {
            transport,
            root_server: config.whois_server.to_ascii_lowercase(),
            timeout: config.whois_timeout(),
            max_hops: config.whois_max_hops.max(1),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Looks up an already normalized domain. A registry that has nothing to
    /// say about it still yields a record with only `domain` set.
    pub async fn lookup(&self, domain: &str) -> Result<WhoisRecord, LookupError> {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut server = initial_server(domain, &self.root_server);
        let mut visited: Vec<String> = Vec::new();
        let mut answered: Option<(String, String)> = None;

        for hop in 0..self.max_hops {
            visited.push(server.clone());
            debug!(domain, server = %server, hop, "whois query");

            let outcome = match tokio::time::timeout_at(deadline, self.transport.query(&server, domain))
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(LookupError::timeout(format!(
                    "{server} did not answer within {:?}",
                    self.timeout
                ))),
            };

            let response = match outcome {
                Ok(response) => response,
                Err(err) => match &answered {
                    Some((previous, _)) if *previous != self.root_server => {
                        warn!(domain, server = %server, error = %err, "referral failed, keeping {previous}");
                        break;
                    }
                    _ => return Err(err),
                },
            };

            let referral = find_referral(&response);
            if !response.trim().is_empty() {
                answered = Some((server.clone(), response));
            }

            // The root is only ever the first hop.
            match referral {
                Some(next) if !visited.contains(&next) && next != self.root_server => {
                    server = next
                }
                _ => break,
            }
        }

        let record = match answered {
            Some((source, text)) if source != self.root_server => parse_response(domain, &text),
            _ => WhoisRecord::empty(domain),
        };

        info!(
            domain,
            servers = ?visited,
            registrar = record.registrar.as_deref().unwrap_or("-"),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "whois lookup finished"
        );

        Ok(record)
    }
}

fn initial_server(domain: &str, root_server: &str) -> String {
    let suffix = domain.rsplit('.').next().unwrap_or_default();
    if suffix.bytes().all(|b| b.is_ascii_digit()) || domain.contains(':') {
        // IP addresses go to the root, which refers to the right RIR.
        return root_server.to_string();
    }
    REGISTRY_SERVERS
        .iter()
        .find(|(tld, _)| *tld == suffix)
        .map(|(_, server)| server.to_string())
        .unwrap_or_else(|| root_server.to_string())
}

fn referral_regex() -> &'static Regex {
    static REFERRAL: OnceLock<Regex> = OnceLock::new();
    REFERRAL.get_or_init(|| {
        Regex::new(
            r"(?im)^[ \t]*(?:refer|whois|whois server|registrar whois server|referralserver)[ \t]*:[ \t]*(\S+)[ \t]*$",
        )
        .expect("referral pattern is valid")
    })
}

/// The more specific server a response points to, if any.
pub fn find_referral(response: &str) -> Option<String> {
    referral_regex()
        .captures_iter(response)
        .filter_map(|captures| captures.get(1))
        .find_map(|value| clean_server(value.as_str()))
}

fn clean_server(value: &str) -> Option<String> {
    let host = value.strip_prefix("whois://").unwrap_or(value);
    if host.contains("://") {
        return None;
    }
    let host = host.trim_end_matches('/').trim_end_matches('.');
    let host = host.split(':').next().unwrap_or_default();
    if host.contains('.') {
        Some(host.to_ascii_lowercase())
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    RegistryDomainId,
    Registrar,
    WhoisServer,
    RegistrarUrl,
    Created,
    Updated,
    Expires,
    Status,
    NameServer,
    Dnssec,
}

fn field_for(label: &str) -> Option<Field> {
    let label = label
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase();
    let field = match label.as_str() {
        "registry domain id" | "domain id" => Field::RegistryDomainId,
        "registrar" | "sponsoring registrar" | "registrar name" | "registrar organization" => {
            Field::Registrar
        }
        "registrar whois server" | "whois server" => Field::WhoisServer,
        "registrar url" | "referral url" | "registrar website" => Field::RegistrarUrl,
        "creation date" | "created" | "created on" | "created date" | "registered"
        | "registered on" | "registration time" | "domain registration date" => Field::Created,
        "updated date" | "last updated" | "last updated on" | "last modified" | "changed"
        | "modified" => Field::Updated,
        "registry expiry date"
        | "registrar registration expiration date"
        | "expiration date"
        | "expiry date"
        | "expire date"
        | "expires"
        | "expires on"
        | "expiration time"
        | "paid-till"
        | "renewal date" => Field::Expires,
        "domain status" | "status" | "state" => Field::Status,
        "name server" | "name servers" | "nameserver" | "nameservers" | "nserver" => {
            Field::NameServer
        }
        "dnssec" => Field::Dnssec,
        _ => return None,
    };
    Some(field)
}

fn apply(record: &mut WhoisRecord, field: Field, value: &str) {
    let scalar = match field {
        Field::RegistryDomainId => &mut record.registry_domain_id,
        Field::Registrar => &mut record.registrar,
        Field::WhoisServer => &mut record.whois_server,
        Field::RegistrarUrl => &mut record.registrar_url,
        Field::Created => &mut record.creation_date,
        Field::Updated => &mut record.updated_date,
        Field::Expires => &mut record.expiry_date,
        Field::Dnssec => &mut record.dnssec,
        Field::Status => {
            if !record.statuses.iter().any(|status| status == value) {
                record.statuses.push(value.to_string());
            }
            return;
        }
        Field::NameServer => {
            let Some(name) = value.split_whitespace().next() else {
                return;
            };
            let name = name.trim_end_matches('.');
            if !record
                .name_servers
                .iter()
                .any(|known| known.eq_ignore_ascii_case(name))
            {
                record.name_servers.push(name.to_string());
            }
            return;
        }
    };
    // Registries repeat some labels further down; the first one wins.
    if scalar.is_none() {
        *scalar = Some(value.to_string());
    }
}

/// Extracts the known fields of a WHOIS response. Labels are matched
/// case-insensitively; a label with an empty value takes its values from the
/// indented lines below it.
pub fn parse_response(domain: &str, text: &str) -> WhoisRecord {
    let mut record = WhoisRecord::empty(domain);
    let mut pending: Option<Field> = None;

    for raw in text.lines() {
        let line: String = raw
            .chars()
            .filter(|c| *c == '\t' || !c.is_control())
            .collect();
        let trimmed = line.trim();

        if trimmed.is_empty()
            || trimmed.starts_with('%')
            || trimmed.starts_with('#')
            || trimmed.starts_with(">>>")
        {
            pending = None;
            continue;
        }

        if let Some((label, value)) = trimmed.split_once(':') {
            if let Some(field) = field_for(label) {
                let value = value.trim();
                if value.is_empty() {
                    pending = Some(field);
                } else {
                    pending = None;
                    apply(&mut record, field, value);
                }
                continue;
            }
        }

        match pending {
            Some(field) if line.starts_with(char::is_whitespace) => {
                apply(&mut record, field, trimmed)
            }
            _ => pending = None,
        }
    }

    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::LookupErrorKind, mock::MockWhois};

    const IANA_COM: &str = "\
% IANA WHOIS server
% for more information on IANA, visit http://www.iana.org

refer:        whois.verisign-grs.com

domain:       COM
status:       ACTIVE
nserver:      A.GTLD-SERVERS.NET 192.5.6.30
whois:        whois.verisign-grs.com
";

    const VERISIGN_EXAMPLE: &str = "\
   Domain Name: EXAMPLE.COM\r
   Registry Domain ID: 2336799_DOMAIN_COM-VRSN\r
   Registrar WHOIS Server: whois.iana.org\r
   Registrar URL: http://res-dom.iana.org\r
   Updated Date: 2024-08-14T07:01:34Z\r
   Creation Date: 1995-08-14T04:00:00Z\r
   Registry Expiry Date: 2025-08-13T04:00:00Z\r
   Registrar: RESERVED-Internet Assigned Numbers Authority\r
   Domain Status: clientDeleteProhibited https://icann.org/epp#clientDeleteProhibited\r
   Domain Status: clientTransferProhibited https://icann.org/epp#clientTransferProhibited\r
   Domain Status: clientDeleteProhibited https://icann.org/epp#clientDeleteProhibited\r
   Name Server: A.IANA-SERVERS.NET\r
   Name Server: B.IANA-SERVERS.NET\r
   DNSSEC: signedDelegation\r
>>> Last update of whois database: 2024-10-01T12:00:00Z <<<\r
";

    fn client(transport: MockWhois, max_hops: usize) -> WhoisClient<MockWhois> {
        let config = ScanConfig {
            whois_max_hops: max_hops,
            whois_timeout_ms: 500,
            ..ScanConfig::default()
        };
        WhoisClient::new(transport, &config)
    }

    #[test]
    fn parses_registry_style_response() {
        let record = parse_response("example.com", VERISIGN_EXAMPLE);

        assert_eq!(record.domain, "example.com");
        assert_eq!(record.registry_domain_id.as_deref(), Some("2336799_DOMAIN_COM-VRSN"));
        assert_eq!(
            record.registrar.as_deref(),
            Some("RESERVED-Internet Assigned Numbers Authority")
        );
        assert_eq!(record.whois_server.as_deref(), Some("whois.iana.org"));
        assert_eq!(record.registrar_url.as_deref(), Some("http://res-dom.iana.org"));
        assert_eq!(record.creation_date.as_deref(), Some("1995-08-14T04:00:00Z"));
        assert_eq!(record.updated_date.as_deref(), Some("2024-08-14T07:01:34Z"));
        assert_eq!(record.expiry_date.as_deref(), Some("2025-08-13T04:00:00Z"));
        assert_eq!(record.statuses.len(), 2);
        assert!(record.statuses[0].starts_with("clientDeleteProhibited"));
        assert_eq!(record.name_servers, vec!["A.IANA-SERVERS.NET", "B.IANA-SERVERS.NET"]);
        assert_eq!(record.dnssec.as_deref(), Some("signedDelegation"));
    }

    #[test]
    fn labels_are_case_insensitive() {
        let text = "domain status: ok\nNAME SERVER: ns1.example.net.\nnserver: NS1.EXAMPLE.NET\ncreated: 2001-01-01\n";
        let record = parse_response("example.net", text);
        assert_eq!(record.statuses, vec!["ok"]);
        assert_eq!(record.name_servers, vec!["ns1.example.net"]);
        assert_eq!(record.creation_date.as_deref(), Some("2001-01-01"));
    }

    #[test]
    fn indented_values_follow_an_empty_label() {
        let text = "\
    Domain name:
        example.co.uk

    Registrar:
        Example Registrar Ltd [Tag = EXAMPLE]
        URL: https://registrar.example

    Relevant dates:
        Registered on: 26-Aug-1996
        Expiry date:  26-Aug-2026

    Name servers:
        ns1.example.co.uk   192.0.2.1
        ns2.example.co.uk

    DNSSEC:
        Signed
";
        let record = parse_response("example.co.uk", text);
        assert_eq!(record.registrar.as_deref(), Some("Example Registrar Ltd [Tag = EXAMPLE]"));
        assert_eq!(record.creation_date.as_deref(), Some("26-Aug-1996"));
        assert_eq!(record.expiry_date.as_deref(), Some("26-Aug-2026"));
        assert_eq!(record.name_servers, vec!["ns1.example.co.uk", "ns2.example.co.uk"]);
        assert_eq!(record.dnssec.as_deref(), Some("Signed"));
        assert_eq!(record.registry_domain_id, None);
    }

    #[test]
    fn unknown_domains_leave_every_field_unset() {
        let record = parse_response("nothing-here.com", "No match for \"NOTHING-HERE.COM\".\r\n");
        assert_eq!(record, WhoisRecord::empty("nothing-here.com"));
    }

    #[test]
    fn referrals_are_found_and_cleaned() {
        assert_eq!(find_referral(IANA_COM).as_deref(), Some("whois.verisign-grs.com"));
        assert_eq!(
            find_referral("ReferralServer:  whois://whois.ripe.net\n").as_deref(),
            Some("whois.ripe.net")
        );
        assert_eq!(
            find_referral("Registrar WHOIS Server: WHOIS.MarkMonitor.com\n").as_deref(),
            Some("whois.markmonitor.com")
        );
        assert_eq!(find_referral("ReferralServer: rwhois://rwhois.example.net:4321\n"), None);
        assert_eq!(find_referral("Registrar WHOIS Server:\n"), None);
    }

    #[test]
    fn referral_pattern_compiles() {
        let pattern = referral_regex();
        assert_eq!(pattern.captures_len(), 2);
        assert!(pattern.is_match("refer: whois.nic.museum"));
    }

    #[test]
    fn known_suffixes_skip_the_root() {
        assert_eq!(initial_server("example.com", "whois.iana.org"), "whois.verisign-grs.com");
        assert_eq!(initial_server("example.museum", "whois.iana.org"), "whois.iana.org");
        assert_eq!(initial_server("192.0.2.1", "whois.iana.org"), "whois.iana.org");
        assert_eq!(initial_server("2001:db8::1", "whois.iana.org"), "whois.iana.org");
    }

    #[tokio::test]
    async fn follows_one_referral_from_the_root() {
        let registry = "Registrar: Example Registrar\nName Server: ns1.example.museum\n";
        let transport = MockWhois::new()
            .respond("whois.iana.org", "refer: whois.nic.museum\n\ndomain: MUSEUM\nstatus: ACTIVE\n")
            .respond("whois.nic.museum", registry);

        let whois = client(transport, 2);
        let record = whois.lookup("example.museum").await.unwrap();

        assert_eq!(record.registrar.as_deref(), Some("Example Registrar"));
        assert_eq!(record.statuses, Vec::<String>::new());
        let servers: Vec<String> = whois.transport().queries().into_iter().map(|(s, _)| s).collect();
        assert_eq!(servers, vec!["whois.iana.org", "whois.nic.museum"]);
    }

    #[tokio::test]
    async fn hop_budget_caps_the_referral_chain() {
        let transport = MockWhois::new()
            .respond("whois.verisign-grs.com", "Registrar: Registry View\nRegistrar WHOIS Server: whois.registrar.example\n")
            .respond("whois.registrar.example", "Registrar: Registrar View\nWhois Server: whois.reseller.example\n")
            .respond("whois.reseller.example", "Registrar: Reseller View\n");

        let whois = client(transport, 2);
        let record = whois.lookup("example.com").await.unwrap();

        assert_eq!(record.registrar.as_deref(), Some("Registrar View"));
        assert_eq!(whois.transport().queries().len(), 2);
    }

    #[tokio::test]
    async fn registry_pointing_back_at_the_root_keeps_its_answer() {
        let transport = MockWhois::new()
            .respond("whois.iana.org", IANA_COM)
            .respond("whois.verisign-grs.com", VERISIGN_EXAMPLE);

        let whois = client(transport, 3);
        let record = whois.lookup("example.com").await.unwrap();

        assert_eq!(record.registry_domain_id.as_deref(), Some("2336799_DOMAIN_COM-VRSN"));
        assert_eq!(
            record.registrar.as_deref(),
            Some("RESERVED-Internet Assigned Numbers Authority")
        );
        let servers: Vec<String> = whois.transport().queries().into_iter().map(|(s, _)| s).collect();
        assert_eq!(servers, vec!["whois.verisign-grs.com"]);
    }

    #[tokio::test]
    async fn referral_loops_stop() {
        let transport = MockWhois::new()
            .respond("whois.verisign-grs.com", "Registrar: Loop\nRegistrar WHOIS Server: whois.verisign-grs.com\n");

        let whois = client(transport, 5);
        let record = whois.lookup("example.com").await.unwrap();

        assert_eq!(record.registrar.as_deref(), Some("Loop"));
        assert_eq!(whois.transport().queries().len(), 1);
    }

    #[tokio::test]
    async fn failed_referral_keeps_the_registry_answer() {
        let transport = MockWhois::new()
            .respond("whois.verisign-grs.com", VERISIGN_EXAMPLE.replace("whois.iana.org", "whois.gone.example").as_str())
            .fail("whois.gone.example", LookupError::connection_failed("refused"));

        let record = client(transport, 2).lookup("example.com").await.unwrap();
        assert_eq!(record.registry_domain_id.as_deref(), Some("2336799_DOMAIN_COM-VRSN"));
    }

    #[tokio::test]
    async fn root_only_answers_produce_an_empty_record() {
        let transport = MockWhois::new().respond("whois.iana.org", "% no referral\nstatus: ACTIVE\n");
        let record = client(transport, 2).lookup("example.zz").await.unwrap();
        assert_eq!(record, WhoisRecord::empty("example.zz"));
    }

    #[tokio::test]
    async fn unreachable_first_server_is_an_error() {
        let transport = MockWhois::new().fail("whois.iana.org", LookupError::connection_failed("refused"));
        let err = client(transport, 2).lookup("example.zz").await.unwrap_err();
        assert_eq!(err.kind, LookupErrorKind::ConnectionFailed);
    }

    #[tokio::test]
    async fn slow_servers_time_out() {
        let transport = MockWhois::new()
            .respond("whois.iana.org", "refer: whois.nic.zz\n")
            .delayed(Duration::from_secs(5));
        let err = client(transport, 2).lookup("example.zz").await.unwrap_err();
        assert_eq!(err.kind, LookupErrorKind::Timeout);
    }
}
