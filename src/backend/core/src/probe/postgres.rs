use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::Connection;
use tracing::trace;

use super::{classify_io, resolve_target, ProbeError, ReadinessProbe};

/// SQLSTATE class 28: invalid authorization specification.
const SQLSTATE_INVALID_AUTHORIZATION: &str = "28";

/// Ready once the server accepts a session for the configured database and
/// answers `SELECT 1`.
///
/// Each check opens and closes its own connection; no pool is kept.
pub struct PostgresProbe {
    host: String,
    port: u16,
    user: String,
    password: String,
    database: String,
}

impl PostgresProbe {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            password: password.into(),
            database: database.into(),
        }
    }

    fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
            .application_name("stackup")
    }
}

impl std::fmt::Debug for PostgresProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresProbe")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ReadinessProbe for PostgresProbe {
    fn name(&self) -> &str {
        "postgres"
    }

    fn target(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }

    async fn check(&self) -> Result<(), ProbeError> {
        resolve_target(&self.host, self.port).await?;

        let mut conn = PgConnection::connect_with(&self.connect_options())
            .await
            .map_err(|e| classify(&self.target(), e))?;

        let one: i32 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&mut conn)
            .await
            .map_err(|e| classify(&self.target(), e))?;

        if one != 1 {
            return Err(ProbeError::not_ready(format!("unexpected SELECT 1 result: {}", one)));
        }

        // Failing to close cleanly says nothing about readiness
        if let Err(e) = conn.close().await {
            trace!(error = %e, "Closing probe connection failed");
        }

        Ok(())
    }
}

/// Map a sqlx error to a probe verdict.
fn classify(target: &str, err: sqlx::Error) -> ProbeError {
    match err {
        sqlx::Error::Database(db) => {
            let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
            let detail = format!("{}: {} (SQLSTATE {})", target, db.message(), code);
            if code.starts_with(SQLSTATE_INVALID_AUTHORIZATION) {
                ProbeError::Fatal(detail)
            } else {
                // 57P03 "starting up", 3D000 database not created yet, ...
                ProbeError::NotReady(detail)
            }
        }
        sqlx::Error::Configuration(e) => ProbeError::fatal(format!("{}: {}", target, e)),
        sqlx::Error::Tls(e) => ProbeError::fatal(format!("{}: TLS: {}", target, e)),
        sqlx::Error::Io(e) => classify_io(target, &e),
        other => ProbeError::not_ready(format!("{}: {}", target, other)),
    }
}
