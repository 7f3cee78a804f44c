//! Port probe engine.
//!
//! Probes run on the current task through a `buffer_unordered` stream, so at
//! most `concurrency` sockets are open at any time and the rest of the plan
//! waits in the queue. Completed probes are written into a slot per plan
//! index, which is how results come back in the caller's order rather than in
//! completion order.

use std::{
    io::ErrorKind,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    time::Duration,
};

use async_trait::async_trait;
use futures::{stream, StreamExt};
use tokio::{
    net::{TcpStream, UdpSocket},
    time::Instant,
};
use tracing::{debug, info};

use crate::{
    common_ports::service_name,
    error::ProbeError,
    models::{PortResult, PortState, Protocol, ScanPlan},
};

const UDP_RECV_BUFFER: usize = 1500;

/// Classifies one port. Implementations may wait forever: the engine owns the
/// per-port timeout and treats expiry as `Filtered`.
#[async_trait]
pub trait PortProber: Send + Sync {
    async fn probe(&self, addr: SocketAddr, protocol: Protocol) -> Result<PortState, ProbeError>;
}

/// Probes with real sockets: TCP connect and connected-UDP datagrams.
#[derive(Debug, Clone, Copy, Default)]
pub struct SocketProber;

#[async_trait]
impl PortProber for SocketProber {
    async fn probe(&self, addr: SocketAddr, protocol: Protocol) -> Result<PortState, ProbeError> {
        match protocol {
            Protocol::Tcp => probe_tcp(addr).await,
            Protocol::Udp => probe_udp(addr).await,
        }
    }
}

async fn probe_tcp(addr: SocketAddr) -> Result<PortState, ProbeError> {
    match TcpStream::connect(addr).await {
        // Dropping the stream closes the connection right away.
        Ok(_stream) => Ok(PortState::Open),
        Err(err) if err.kind() == ErrorKind::ConnectionRefused => Ok(PortState::Closed),
        Err(err) if err.kind() == ErrorKind::TimedOut => Ok(PortState::Filtered),
        Err(source) => Err(ProbeError {
            port: addr.port(),
            source,
        }),
    }
}

/// A connected UDP socket surfaces an ICMP port-unreachable as
/// `ConnectionRefused` on the next send or receive. Silence never resolves
/// here; the engine's timeout turns it into `Filtered`.
async fn probe_udp(addr: SocketAddr) -> Result<PortState, ProbeError> {
    let port = addr.port();
    let probe_err = |source| ProbeError { port, source };

    let local: IpAddr = match addr {
        SocketAddr::V4(_) => Ipv4Addr::UNSPECIFIED.into(),
        SocketAddr::V6(_) => Ipv6Addr::UNSPECIFIED.into(),
    };
    let socket = UdpSocket::bind(SocketAddr::new(local, 0))
        .await
        .map_err(probe_err)?;
    socket.connect(addr).await.map_err(probe_err)?;

    match socket.send(udp_payload(port)).await {
        Ok(_) => {}
        Err(err) if err.kind() == ErrorKind::ConnectionRefused => return Ok(PortState::Closed),
        Err(err) => return Err(probe_err(err)),
    }

    let mut buf = [0u8; UDP_RECV_BUFFER];
    match socket.recv(&mut buf).await {
        Ok(_) => Ok(PortState::Open),
        Err(err) if err.kind() == ErrorKind::ConnectionRefused => Ok(PortState::Closed),
        Err(err) => Err(probe_err(err)),
    }
}

const DNS_ROOT_NS_QUERY: &[u8] = &[
    0x13, 0x37, 0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x00,
    0x01,
];

const NTP_CLIENT_REQUEST: &[u8] = &[
    0x1b, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
];

// GetRequest for sysDescr.0 with community "public".
const SNMP_GET_SYSDESCR: &[u8] = &[
    0x30, 0x29, 0x02, 0x01, 0x01, 0x04, 0x06, 0x70, 0x75, 0x62, 0x6c, 0x69, 0x63, 0xa1, 0x1c, 0x02,
    0x04, 0x1b, 0xc8, 0x8f, 0x4e, 0x02, 0x01, 0x00, 0x02, 0x01, 0x00, 0x30, 0x0e, 0x30, 0x0c, 0x06,
    0x08, 0x2b, 0x06, 0x01, 0x02, 0x01, 0x01, 0x01, 0x00, 0x05, 0x00,
];

// NBSTAT query for the wildcard name "*".
const NETBIOS_NBSTAT: &[u8] = &[
    0x81, 0xca, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x20, 0x43, 0x4b, 0x41,
    0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41,
    0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x00, 0x00, 0x21,
    0x00, 0x01,
];

/// Smallest datagram a service on `port` is likely to answer. Unknown ports
/// get an empty datagram.
pub fn udp_payload(port: u16) -> &'static [u8] {
    match port {
        53 => DNS_ROOT_NS_QUERY,
        123 => NTP_CLIENT_REQUEST,
        137 => NETBIOS_NBSTAT,
        161 => SNMP_GET_SYSDESCR,
        _ => &[],
    }
}

/// Probes every port of `plan` and returns one result per port, in plan order.
pub async fn probe<P>(
    prober: &P,
    plan: &ScanPlan,
    timeout_per_port: Duration,
    concurrency: usize,
) -> Vec<PortResult>
where
    P: PortProber + ?Sized,
{
    probe_until(prober, plan, timeout_per_port, concurrency, None).await
}

/// Like [`probe`], but never runs past `deadline`: queued ports are reported
/// `Filtered` once it has passed and in-flight probes are cut short at it.
pub async fn probe_until<P>(
    prober: &P,
    plan: &ScanPlan,
    timeout_per_port: Duration,
    concurrency: usize,
    deadline: Option<Instant>,
) -> Vec<PortResult>
where
    P: PortProber + ?Sized,
{
    let concurrency = concurrency.max(1);
    let started = Instant::now();
    let address = plan.address;
    let protocol = plan.protocol;

    info!(
        host = %plan.target,
        %address,
        %protocol,
        ports = plan.ports.len(),
        concurrency,
        "starting port probe"
    );

    let mut slots: Vec<Option<PortResult>> = vec![None; plan.ports.len()];
    let mut completed = stream::iter(plan.ports.iter().copied().enumerate())
        .map(|(index, port)| async move {
            let addr = SocketAddr::new(address, port);
            let result = probe_port(prober, addr, protocol, timeout_per_port, deadline).await;
            (index, result)
        })
        .buffer_unordered(concurrency);

    while let Some((index, result)) = completed.next().await {
        slots[index] = Some(result);
    }

    let results: Vec<PortResult> = slots.into_iter().flatten().collect();
    let open = results
        .iter()
        .filter(|result| result.state == PortState::Open)
        .count();
    info!(
        host = %plan.target,
        checked = results.len(),
        open,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "port probe finished"
    );

    results
}

async fn probe_port<P>(
    prober: &P,
    addr: SocketAddr,
    protocol: Protocol,
    timeout: Duration,
    deadline: Option<Instant>,
) -> PortResult
where
    P: PortProber + ?Sized,
{
    let port = addr.port();
    let now = Instant::now();
    let mut expires = now + timeout;

    if let Some(deadline) = deadline {
        if deadline <= now {
            debug!(port, "request deadline passed before probe started");
            return port_result(port, protocol, PortState::Filtered, None);
        }
        expires = expires.min(deadline);
    }

    match tokio::time::timeout_at(expires, prober.probe(addr, protocol)).await {
        Ok(Ok(state)) => port_result(port, protocol, state, None),
        Ok(Err(err)) => {
            debug!(port, error = %err.source, "probe failed");
            port_result(port, protocol, PortState::Error, Some(err.source.to_string()))
        }
        Err(_) => port_result(port, protocol, PortState::Filtered, None),
    }
}

fn port_result(
    port: u16,
    protocol: Protocol,
    state: PortState,
    error: Option<String>,
) -> PortResult {
    let service = match state {
        PortState::Open => service_name(port, protocol).map(str::to_string),
        _ => None,
    };
    PortResult {
        port,
        state,
        service,
        error,
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    use super::*;
    use crate::mock::{MockProber, ProbeScript};

    fn plan(ports: &[u16]) -> ScanPlan {
        ScanPlan {
            target: "192.0.2.10".into(),
            address: "192.0.2.10".parse().unwrap(),
            ports: ports.to_vec(),
            protocol: Protocol::Tcp,
        }
    }

    #[tokio::test]
    async fn results_follow_plan_order_not_completion_order() {
        let prober = MockProber::new(HashMap::from([
            (443, ProbeScript::after(Duration::from_millis(60), PortState::Open)),
            (22, ProbeScript::after(Duration::from_millis(30), PortState::Open)),
            (80, ProbeScript::after(Duration::ZERO, PortState::Open)),
        ]));

        let results = probe(&prober, &plan(&[443, 22, 80]), Duration::from_secs(1), 10).await;

        let ports: Vec<u16> = results.iter().map(|r| r.port).collect();
        assert_eq!(ports, vec![443, 22, 80]);
        assert_eq!(results[0].service.as_deref(), Some("https"));
        assert_eq!(results[1].service.as_deref(), Some("ssh"));
        assert_eq!(results[2].service.as_deref(), Some("http"));
    }

    #[tokio::test]
    async fn silent_ports_are_filtered_in_parallel() {
        let prober = MockProber::silent();
        let timeout = Duration::from_millis(100);
        let ports: Vec<u16> = (1..=20).collect();

        let started = std::time::Instant::now();
        let results = probe(&prober, &plan(&ports), timeout, 20).await;
        let elapsed = started.elapsed();

        assert_eq!(results.len(), 20);
        assert!(results.iter().all(|r| r.state == PortState::Filtered));
        assert!(results.iter().all(|r| r.service.is_none()));
        assert!(elapsed < timeout * 5, "took {elapsed:?}");
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let prober = MockProber::counting(in_flight, peak.clone(), Duration::from_millis(10));
        let ports: Vec<u16> = (1000..1050).collect();

        let results = probe(&prober, &plan(&ports), Duration::from_secs(1), 4).await;

        assert_eq!(results.len(), 50);
        assert!(peak.load(Ordering::SeqCst) <= 4);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn probe_errors_stay_on_their_port() {
        let prober = MockProber::new(HashMap::from([
            (22, ProbeScript::fail(ErrorKind::AddrNotAvailable)),
            (80, ProbeScript::after(Duration::ZERO, PortState::Closed)),
        ]));

        let results = probe(&prober, &plan(&[22, 80]), Duration::from_secs(1), 2).await;

        assert_eq!(results[0].state, PortState::Error);
        assert!(results[0].error.is_some());
        assert!(results[0].service.is_none());
        assert_eq!(results[1].state, PortState::Closed);
        assert!(results[1].error.is_none());
        assert!(results[1].service.is_none());
    }

    #[tokio::test]
    async fn passed_deadline_reports_queued_ports_filtered() {
        let prober = MockProber::silent();
        let deadline = Instant::now() + Duration::from_millis(50);
        let ports: Vec<u16> = (1..=10).collect();

        let started = std::time::Instant::now();
        let results = probe_until(&prober, &plan(&ports), Duration::from_secs(5), 2, Some(deadline)).await;

        assert_eq!(results.len(), 10);
        assert!(results.iter().all(|r| r.state == PortState::Filtered));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn zero_concurrency_still_probes() {
        let prober = MockProber::new(HashMap::from([(
            7,
            ProbeScript::after(Duration::ZERO, PortState::Open),
        )]));
        let results = probe(&prober, &plan(&[7]), Duration::from_secs(1), 0).await;
        assert_eq!(results[0].state, PortState::Open);
        assert_eq!(results[0].service, None);
    }

    #[test]
    fn well_known_udp_ports_get_payloads() {
        assert_eq!(udp_payload(123).len(), 48);
        assert_eq!(udp_payload(53)[2], 0x01);
        assert!(udp_payload(40000).is_empty());
    }
}
