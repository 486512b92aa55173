use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tracing::trace;

use super::{classify_io, resolve_target, ProbeError, ReadinessProbe};

/// Ready once the port accepts a TCP connection.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    host: String,
    port: u16,
}

impl TcpProbe {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

#[async_trait]
impl ReadinessProbe for TcpProbe {
    fn name(&self) -> &str {
        "tcp"
    }

    fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    async fn check(&self) -> Result<(), ProbeError> {
        let addrs = resolve_target(&self.host, self.port).await?;
        connect_any(&self.target(), &addrs).await
    }
}

/// Connect to the first address that accepts. The last error decides the
/// verdict when none does.
async fn connect_any(target: &str, addrs: &[SocketAddr]) -> Result<(), ProbeError> {
    let stream = TcpStream::connect(addrs)
        .await
        .map_err(|e| classify_io(target, &e))?;

    if let Ok(peer) = stream.peer_addr() {
        trace!(target_addr = %peer, "TCP connect succeeded");
    }
    Ok(())
}
