use netprobe::{
    dns::TrustDnsResolver, ports::SocketProber, whois::TcpWhoisTransport, ScanConfig, Scanner,
    SystemScanner,
};
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};

/// A real scanner that does not depend on the host's resolv.conf.
pub fn scanner(config: ScanConfig) -> anyhow::Result<SystemScanner> {
    let resolver = TrustDnsResolver::with_config(
        ResolverConfig::default(),
        ResolverOpts::default(),
        config.dns_timeout(),
    )?;
    let transport = TcpWhoisTransport::new(config.whois_port);
    Ok(Scanner::new(config, SocketProber, transport, resolver))
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
