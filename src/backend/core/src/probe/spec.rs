use serde::{Deserialize, Serialize};

/// Readiness-check descriptor of a node, tagged by `kind` in configuration.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeSpec {
    /// Plain TCP connect
    Tcp { host: String, port: u16 },

    /// PostgreSQL connect + `SELECT 1`
    Postgres {
        host: String,
        port: u16,
        user: String,
        password: String,
        database: String,
    },

    /// Redis `PING`
    Redis {
        host: String,
        port: u16,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },

    /// HTTP GET against a health endpoint
    Http {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expected_status: Option<StatusRange>,
    },
}

impl ProbeSpec {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    pub fn http(url: impl Into<String>) -> Self {
        Self::Http {
            url: url.into(),
            expected_status: None,
        }
    }

    /// Short kind label.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Tcp { .. } => "tcp",
            Self::Postgres { .. } => "postgres",
            Self::Redis { .. } => "redis",
            Self::Http { .. } => "http",
        }
    }

    /// Target description without credentials.
    pub fn target(&self) -> String {
        match self {
            Self::Tcp { host, port } | Self::Redis { host, port, .. } => {
                format!("{}:{}", host, port)
            }
            Self::Postgres {
                host,
                port,
                database,
                ..
            } => format!("{}:{}/{}", host, port, database),
            Self::Http { url, .. } => url.clone(),
        }
    }

    /// Copy with every secret replaced by a placeholder.
    pub fn redacted(&self) -> Self {
        match self {
            Self::Postgres {
                host,
                port,
                user,
                database,
                ..
            } => Self::Postgres {
                host: host.clone(),
                port: *port,
                user: user.clone(),
                password: crate::config::REDACTED.to_string(),
                database: database.clone(),
            },
            Self::Redis {
                host,
                port,
                password,
            } => Self::Redis {
                host: host.clone(),
                port: *port,
                password: password.as_ref().map(|_| crate::config::REDACTED.to_string()),
            },
            other => other.clone(),
        }
    }
}

impl std::fmt::Debug for ProbeSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp { host, port } => f
                .debug_struct("Tcp")
                .field("host", host)
                .field("port", port)
                .finish(),
            Self::Postgres {
                host,
                port,
                user,
                database,
                ..
            } => f
                .debug_struct("Postgres")
                .field("host", host)
                .field("port", port)
                .field("user", user)
                .field("password", &"***")
                .field("database", database)
                .finish(),
            Self::Redis {
                host,
                port,
                password,
            } => f
                .debug_struct("Redis")
                .field("host", host)
                .field("port", port)
                .field("password", &password.as_ref().map(|_| "***"))
                .finish(),
            Self::Http {
                url,
                expected_status,
            } => f
                .debug_struct("Http")
                .field("url", url)
                .field("expected_status", expected_status)
                .finish(),
        }
    }
}

/// Inclusive range of acceptable HTTP status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRange {
    pub min: u16,
    pub max: u16,
}

impl StatusRange {
    pub fn new(min: u16, max: u16) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, status: u16) -> bool {
        (self.min..=self.max).contains(&status)
    }
}

impl Default for StatusRange {
    fn default() -> Self {
        Self { min: 200, max: 299 }
    }
}

impl std::fmt::Display for StatusRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.min, self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn postgres() -> ProbeSpec {
        ProbeSpec::Postgres {
            host: "db".into(),
            port: 5432,
            user: "app".into(),
            password: "hunter2".into(),
            database: "app_db".into(),
        }
    }

    #[test]
    fn test_debug_hides_password() {
        let rendered = format!("{:?}", postgres());
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("app_db"));
    }

    #[test]
    fn test_target_hides_password() {
        assert_eq!(postgres().target(), "db:5432/app_db");
    }

    #[test]
    fn test_redacted() {
        match postgres().redacted() {
            ProbeSpec::Postgres { password, .. } => assert_eq!(password, crate::config::REDACTED),
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn test_tagged_serialization() {
        let json = serde_json::to_value(ProbeSpec::tcp("localhost", 9100)).unwrap();
        assert_eq!(json["kind"], "tcp");
        assert_eq!(json["port"], 9100);

        let http: ProbeSpec = serde_json::from_value(serde_json::json!({
            "kind": "http",
            "url": "http://localhost:9090/-/ready",
            "expected_status": { "min": 200, "max": 204 }
        }))
        .unwrap();
        assert_eq!(http.kind_name(), "http");
        match http {
            ProbeSpec::Http { expected_status, .. } => {
                let range = expected_status.unwrap();
                assert!(range.contains(204));
                assert!(!range.contains(205));
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn test_default_status_range() {
        let range = StatusRange::default();
        assert!(range.contains(200));
        assert!(range.contains(299));
        assert!(!range.contains(301));
        assert_eq!(range.to_string(), "200-299");
    }
}
