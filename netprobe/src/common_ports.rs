use crate::models::Protocol;

// Both tables are sorted by port for binary search.
pub const TCP_SERVICES: &[(u16, &str)] = &[
    (21, "ftp"),
    (22, "ssh"),
    (23, "telnet"),
    (25, "smtp"),
    (53, "domain"),
    (80, "http"),
    (81, "http-alt"),
    (88, "kerberos-sec"),
    (110, "pop3"),
    (111, "rpcbind"),
    (135, "msrpc"),
    (139, "netbios-ssn"),
    (143, "imap"),
    (389, "ldap"),
    (443, "https"),
    (445, "microsoft-ds"),
    (465, "smtps"),
    (587, "submission"),
    (636, "ldaps"),
    (873, "rsync"),
    (993, "imaps"),
    (995, "pop3s"),
    (1080, "socks"),
    (1433, "ms-sql-s"),
    (1521, "oracle"),
    (2049, "nfs"),
    (2181, "zookeeper"),
    (2375, "docker"),
    (3306, "mysql"),
    (3389, "ms-wbt-server"),
    (3690, "svn"),
    (5432, "postgresql"),
    (5672, "amqp"),
    (5900, "vnc"),
    (6379, "redis"),
    (8000, "http-alt"),
    (8080, "http-proxy"),
    (8443, "https-alt"),
    (9000, "cslistener"),
    (9092, "kafka"),
    (9200, "elasticsearch"),
    (11211, "memcache"),
    (27017, "mongod"),
];

pub const UDP_SERVICES: &[(u16, &str)] = &[
    (53, "domain"),
    (67, "dhcps"),
    (68, "dhcpc"),
    (69, "tftp"),
    (123, "ntp"),
    (137, "netbios-ns"),
    (138, "netbios-dgm"),
    (161, "snmp"),
    (162, "snmptrap"),
    (500, "isakmp"),
    (514, "syslog"),
    (520, "route"),
    (1900, "upnp"),
    (4500, "ipsec-nat-t"),
    (5353, "mdns"),
];

/// Well-known service name for a port. Advisory only, nothing is verified on
/// the wire.
pub fn service_name(port: u16, protocol: Protocol) -> Option<&'static str> {
    let table = match protocol {
        Protocol::Tcp => TCP_SERVICES,
        Protocol::Udp => UDP_SERVICES,
    };
    table
        .binary_search_by_key(&port, |(p, _)| *p)
        .ok()
        .map(|index| table[index].1)
}
