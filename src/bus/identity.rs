use log::warn;
use std::net::IpAddr;
use tokio::net::UdpSocket;

use super::topics::{Publication, Topics, LIVENESS_QOS, STATUS_ONLINE};

/// Address of the local interface that routes towards the broker.
///
/// Connecting a UDP socket sends no packets; it only asks the kernel to pick
/// a route, which gives the address other hosts see us under.
pub async fn resolve_outbound_ip(host: &str, port: u16) -> std::io::Result<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect((host, port)).await?;
    Ok(socket.local_addr()?.ip())
}

/// Retained records announcing who is behind the client topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub version: String,
    pub ip: String,
    pub pid: u32,
}

impl ClientIdentity {
    pub async fn discover(host: &str, port: u16) -> Self {
        let ip = match resolve_outbound_ip(host, port).await {
            Ok(ip) => ip.to_string(),
            Err(e) => {
                warn!("Could not resolve outbound IP towards {}:{}: {}", host, port, e);
                "unknown".to_string()
            }
        };

        Self {
            version: crate::VERSION.to_string(),
            ip,
            pid: std::process::id(),
        }
    }

    pub fn publications(&self, topics: &Topics) -> Vec<Publication> {
        vec![
            topics.status_publication(STATUS_ONLINE),
            Publication::new(topics.client("version"), self.version.clone(), LIVENESS_QOS, true),
            Publication::new(topics.client("ip"), self.ip.clone(), LIVENESS_QOS, true),
            Publication::new(topics.client("pid"), self.pid.to_string(), LIVENESS_QOS, true),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_loopback_route() {
        let ip = resolve_outbound_ip("127.0.0.1", 1883).await.unwrap();
        assert!(ip.is_loopback());
    }

    #[test]
    fn test_publications_are_retained_liveness_records() {
        let identity = ClientIdentity {
            version: "0.6.0".to_string(),
            ip: "192.168.1.20".to_string(),
            pid: 4242,
        };
        let publications = identity.publications(&Topics::new("/clients/cc2mqtt/", "/raw/"));

        let topics: Vec<&str> = publications.iter().map(|p| p.topic.as_str()).collect();
        assert_eq!(
            topics,
            vec![
                "/clients/cc2mqtt/status",
                "/clients/cc2mqtt/version",
                "/clients/cc2mqtt/ip",
                "/clients/cc2mqtt/pid"
            ]
        );
        assert_eq!(publications[0].payload, "online");
        assert_eq!(publications[3].payload, "4242");
        assert!(publications.iter().all(|p| p.retain));
    }
}
