//! Readiness probes.
//!
//! A probe answers one question for one dependency: "does it accept requests
//! yet?". It distinguishes a dependency that is still starting
//! ([`ProbeError::NotReady`]) from one that can never become ready with the
//! current configuration ([`ProbeError::Fatal`]).
//!
//! Provided probes:
//! - **TCP**: plain connect
//! - **PostgreSQL**: connect and `SELECT 1`
//! - **Redis**: `PING` answered with `PONG`
//! - **HTTP**: GET with status range and optional JSON `status` field
//!
//! Probes carry no state between calls. The per-attempt timeout is applied
//! by the caller (see [`crate::retry::RetryWaiter`]).

mod cache;
mod http;
mod postgres;
mod spec;
mod tcp;

pub use self::cache::RedisProbe;
pub use self::http::HttpProbe;
pub use self::postgres::PostgresProbe;
pub use self::spec::{ProbeSpec, StatusRange};
pub use self::tcp::TcpProbe;

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::{Result, StackupError};
use crate::graph::Node;

/// Why a probe call did not report ready.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    /// The dependency is not accepting requests yet; worth retrying.
    #[error("not ready: {0}")]
    NotReady(String),

    /// The dependency can never become ready as configured (bad credentials,
    /// unresolvable host, malformed target).
    #[error("fatal: {0}")]
    Fatal(String),
}

impl ProbeError {
    pub fn not_ready(detail: impl Into<String>) -> Self {
        Self::NotReady(detail.into())
    }

    pub fn fatal(detail: impl Into<String>) -> Self {
        Self::Fatal(detail.into())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    /// The human-readable detail without the kind prefix.
    pub fn detail(&self) -> &str {
        match self {
            Self::NotReady(detail) | Self::Fatal(detail) => detail,
        }
    }
}

/// Trait for readiness probes.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// The probe kind (`tcp`, `postgres`, ...).
    fn name(&self) -> &str;

    /// Where the probe points, safe to log (no credentials).
    fn target(&self) -> String;

    /// Perform one readiness check.
    async fn check(&self) -> std::result::Result<(), ProbeError>;
}

/// Builds the probe for a node.
pub trait ProbeFactory: Send + Sync {
    fn build(&self, node: &Node) -> Result<Arc<dyn ReadinessProbe>>;
}

/// Factory for the network probes backing every [`ProbeSpec`] variant.
#[derive(Debug, Clone)]
pub struct NetworkProbeFactory {
    http: reqwest::Client,
}

impl NetworkProbeFactory {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("stackup/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| StackupError::internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { http })
    }
}

impl ProbeFactory for NetworkProbeFactory {
    fn build(&self, node: &Node) -> Result<Arc<dyn ReadinessProbe>> {
        let probe: Arc<dyn ReadinessProbe> = match &node.probe {
            ProbeSpec::Tcp { host, port } => Arc::new(TcpProbe::new(host.clone(), *port)),
            ProbeSpec::Postgres {
                host,
                port,
                user,
                password,
                database,
            } => Arc::new(PostgresProbe::new(
                host.clone(),
                *port,
                user.clone(),
                password.clone(),
                database.clone(),
            )),
            ProbeSpec::Redis {
                host,
                port,
                password,
            } => Arc::new(
                RedisProbe::new(host.clone(), *port, password.clone())
                    .map_err(|e| StackupError::probe_build_failed(node.id.as_str(), e))?,
            ),
            ProbeSpec::Http {
                url,
                expected_status,
            } => Arc::new(
                HttpProbe::new(self.http.clone(), url, expected_status.unwrap_or_default())
                    .map_err(|e| StackupError::probe_build_failed(node.id.as_str(), e))?,
            ),
        };

        Ok(probe)
    }
}

/// Resolve `host:port` to every address it names, in resolver order. A name
/// that does not resolve is a configuration problem, not a startup delay.
pub(crate) async fn resolve_target(
    host: &str,
    port: u16,
) -> std::result::Result<Vec<SocketAddr>, ProbeError> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| ProbeError::fatal(format!("cannot resolve {}: {}", host, e)))?
        .collect();

    if addrs.is_empty() {
        return Err(ProbeError::fatal(format!("{} resolved to no addresses", host)));
    }
    Ok(addrs)
}

/// Classify an I/O error raised while reaching a dependency.
pub(crate) fn classify_io(target: &str, err: &std::io::Error) -> ProbeError {
    use std::io::ErrorKind;

    match err.kind() {
        ErrorKind::PermissionDenied | ErrorKind::InvalidInput => {
            ProbeError::fatal(format!("{}: {}", target, err))
        }
        _ => ProbeError::not_ready(format!("{}: {}", target, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_error_kinds() {
        let transient = ProbeError::not_ready("connection refused");
        assert!(!transient.is_fatal());
        assert_eq!(transient.detail(), "connection refused");
        assert_eq!(transient.to_string(), "not ready: connection refused");

        let fatal = ProbeError::fatal("password authentication failed");
        assert!(fatal.is_fatal());
    }

    #[test]
    fn test_factory_builds_every_kind() {
        let factory = NetworkProbeFactory::new().unwrap();

        let tcp = factory
            .build(&Node::new("exporter", ProbeSpec::tcp("localhost", 9100)))
            .unwrap();
        assert_eq!(tcp.name(), "tcp");
        assert_eq!(tcp.target(), "localhost:9100");

        let http = factory
            .build(&Node::new("app", ProbeSpec::http("http://localhost:8000/health")))
            .unwrap();
        assert_eq!(http.name(), "http");

        let redis = factory
            .build(&Node::new(
                "cache",
                ProbeSpec::Redis {
                    host: "localhost".into(),
                    port: 6379,
                    password: Some("s3cret".into()),
                },
            ))
            .unwrap();
        assert_eq!(redis.target(), "localhost:6379");
        assert!(!redis.target().contains("s3cret"));
    }

    #[test]
    fn test_factory_rejects_malformed_url() {
        let factory = NetworkProbeFactory::new().unwrap();
        let err = factory
            .build(&Node::new("app", ProbeSpec::http("not a url")))
            .err()
            .unwrap();
        assert_eq!(err.code(), crate::error::ErrorCode::ProbeBuildFailed);
    }

    #[tokio::test]
    async fn test_resolve_keeps_every_address() {
        let addrs = resolve_target("127.0.0.1", 5432).await.unwrap();
        assert_eq!(addrs, vec!["127.0.0.1:5432".parse::<SocketAddr>().unwrap()]);

        let addrs = resolve_target("localhost", 5432).await.unwrap();
        assert!(!addrs.is_empty());
        assert!(addrs.iter().all(|addr| addr.port() == 5432));
    }

    #[tokio::test]
    async fn test_unresolvable_host_is_fatal() {
        let err = resolve_target("stackup-does-not-exist.invalid", 80)
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
