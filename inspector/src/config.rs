//! Connection settings for the automation agent.
//!
//! The core never persists these values and only checks that a port is set;
//! it turns them into socket URLs and the `Authentication` field of run
//! requests.

use std::env;

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::InspectorError;

pub const DEFAULT_HOST: &str = "localhost.sirenia.io";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Path suffix of the picking socket.
pub const MONITOR_PATH: &str = "monitor";
/// Path suffix of the execution socket.
pub const FLOWTRACER_PATH: &str = "flowtracer";

/// Yields the host and ports of the agent.
pub trait EndpointProvider: Send + Sync {
    fn endpoint(&self) -> Endpoint;
}

/// Yields the single authentication token sent with run requests.
pub trait CredentialsProvider: Send + Sync {
    fn credentials(&self) -> Credentials;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    /// Preferred over `port` when present and non-zero.
    pub secure_port: Option<u16>,
}

impl Endpoint {
    pub fn new(port: u16) -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port,
            secure_port: None,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_secure_port(mut self, secure_port: Option<u16>) -> Self {
        self.secure_port = secure_port.filter(|p| *p != 0);
        self
    }

    /// Builds `ws[s]://host:port/<path>`.
    pub fn url(&self, path: &str) -> String {
        match self.secure_port.filter(|p| *p != 0) {
            Some(secure) => format!("wss://{}:{}/{}", self.host, secure, path),
            None => format!("ws://{}:{}/{}", self.host, self.port, path),
        }
    }

    pub fn monitor_url(&self) -> String {
        self.url(MONITOR_PATH)
    }

    pub fn flowtracer_url(&self) -> String {
        self.url(FLOWTRACER_PATH)
    }

    /// A usable endpoint needs a non-zero port, plain or secure.
    pub fn validate(&self) -> Result<(), InspectorError> {
        if self.port == 0 && self.secure_port.filter(|p| *p != 0).is_none() {
            return Err(InspectorError::Config(format!(
                "no port configured for agent at {}",
                self.host
            )));
        }
        Ok(())
    }
}

impl EndpointProvider for Endpoint {
    fn endpoint(&self) -> Endpoint {
        self.clone()
    }
}

/// Opaque authentication token, conventionally base64 of `user:password`.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials(String);

impl Credentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn from_user_password(username: &str, password: &str) -> Self {
        Self(STANDARD.encode(format!("{username}:{password}")))
    }

    pub fn token(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Decodes the token back into `(user, password)`, if it has that shape.
    pub fn user_password(&self) -> Option<(String, String)> {
        let raw = STANDARD.decode(self.0.as_bytes()).ok()?;
        let text = String::from_utf8(raw).ok()?;
        let (user, password) = text.split_once(':')?;
        Some((user.to_string(), password.to_string()))
    }
}

// Never print the token itself.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Credentials")
            .field(&if self.0.is_empty() { "<empty>" } else { "<redacted>" })
            .finish()
    }
}

impl CredentialsProvider for Credentials {
    fn credentials(&self) -> Credentials {
        self.clone()
    }
}

/// Everything needed to talk to one agent.
#[derive(Debug, Clone)]
pub struct InspectorConfig {
    pub endpoint: Endpoint,
    pub credentials: Credentials,
    pub timeout_ms: u64,
}

impl InspectorConfig {
    pub fn new(endpoint: Endpoint, credentials: Credentials) -> Self {
        Self {
            endpoint,
            credentials,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    /// Reads `INSPECTOR_HOST`, `INSPECTOR_PORT`, `INSPECTOR_SECURE_PORT`,
    /// `INSPECTOR_CREDENTIALS` and `INSPECTOR_TIMEOUT_MS`.
    pub fn from_env() -> Result<Self, InspectorError> {
        let host = env::var("INSPECTOR_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());
        let port = parse_var::<u16>("INSPECTOR_PORT")?.unwrap_or(0);
        let secure_port = parse_var::<u16>("INSPECTOR_SECURE_PORT")?;
        let credentials = env::var("INSPECTOR_CREDENTIALS").unwrap_or_default();
        let timeout_ms = parse_var::<u64>("INSPECTOR_TIMEOUT_MS")?.unwrap_or(DEFAULT_TIMEOUT_MS);

        tracing::debug!(%host, port, ?secure_port, timeout_ms, "Loaded inspector config from env");

        let endpoint = Endpoint::new(port)
            .with_host(host)
            .with_secure_port(secure_port);
        endpoint.validate()?;

        Ok(Self {
            endpoint,
            credentials: Credentials::new(credentials),
            timeout_ms,
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>, InspectorError> {
    match env::var(name) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| InspectorError::Config(format!("{name} is not a valid number: {raw}"))),
        Err(_) => Ok(None),
    }
}
