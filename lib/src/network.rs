use std::fmt;

use serde::Serialize;

pub const ANYWHERE: &str = "0.0.0.0/0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngressRule {
    pub protocol: Protocol,
    pub from_port: u16,
    pub to_port: u16,
    pub cidr: &'static str,
}

impl IngressRule {
    const fn open(protocol: Protocol, from_port: u16, to_port: u16) -> Self {
        Self {
            protocol,
            from_port,
            to_port,
            cidr: ANYWHERE,
        }
    }

    pub fn contains(&self, protocol: Protocol, port: u16) -> bool {
        self.protocol == protocol && (self.from_port..=self.to_port).contains(&port)
    }
}

impl fmt::Display for IngressRule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.from_port == self.to_port {
            write!(f, "{}/{} from {}", self.from_port, self.protocol.as_str(), self.cidr)
        } else {
            write!(
                f,
                "{}-{}/{} from {}",
                self.from_port,
                self.to_port,
                self.protocol.as_str(),
                self.cidr
            )
        }
    }
}

/// Ports every node needs open: ssh, the API server, etcd, the kubelet and
/// control-plane components, and the flannel VXLAN overlay.
///
/// Masters and workers share one group, so this is the union of both.
pub const CLUSTER_INGRESS: [IngressRule; 5] = [
    IngressRule::open(Protocol::Tcp, 22, 22),
    IngressRule::open(Protocol::Tcp, 6443, 6443),
    IngressRule::open(Protocol::Tcp, 2379, 2380),
    IngressRule::open(Protocol::Tcp, 10250, 10252),
    IngressRule::open(Protocol::Udp, 8472, 8472),
];
