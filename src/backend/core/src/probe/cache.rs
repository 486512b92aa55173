use async_trait::async_trait;
use redis::{ErrorKind, IntoConnectionInfo, RedisError};

use super::{resolve_target, ProbeError, ReadinessProbe};

/// Ready once the server answers `PING` with `PONG`.
pub struct RedisProbe {
    host: String,
    port: u16,
    client: redis::Client,
}

impl RedisProbe {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        password: Option<String>,
    ) -> Result<Self, String> {
        let host = host.into();
        let mut info = format!("redis://{}:{}", host, port)
            .into_connection_info()
            .map_err(|e| format!("invalid redis target: {}", e))?;
        info.redis.password = password;

        let client =
            redis::Client::open(info).map_err(|e| format!("invalid redis target: {}", e))?;

        Ok(Self { host, port, client })
    }

    /// Ping the server over a fresh connection.
    async fn ping(&self) -> Result<(), RedisError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;

        if pong != "PONG" {
            return Err(RedisError::from((
                ErrorKind::ResponseError,
                "Unexpected PING response",
                pong,
            )));
        }

        Ok(())
    }
}

impl std::fmt::Debug for RedisProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisProbe")
            .field("host", &self.host)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ReadinessProbe for RedisProbe {
    fn name(&self) -> &str {
        "redis"
    }

    fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    async fn check(&self) -> Result<(), ProbeError> {
        resolve_target(&self.host, self.port).await?;
        self.ping().await.map_err(|e| classify(&self.target(), &e))
    }
}

fn classify(target: &str, err: &RedisError) -> ProbeError {
    let detail = format!("{}: {}", target, err);

    let auth_rejected = matches!(err.code(), Some("NOAUTH") | Some("WRONGPASS"));
    match err.kind() {
        ErrorKind::AuthenticationFailed | ErrorKind::InvalidClientConfig => {
            ProbeError::Fatal(detail)
        }
        _ if auth_rejected => ProbeError::Fatal(detail),
        // I/O errors, LOADING and everything else clear up on their own
        _ => ProbeError::NotReady(detail),
    }
}
