//! Tracer configuration.
//!
//! Settings come from three places, in increasing precedence: built-in
//! defaults, the `TRACEPORT_*` environment variables, and a properties file
//! named by `TRACEPORT_CONFIG`, which overrides everything it sets.
//! Programmatic configuration through [`ConfigBuilder`] bypasses the
//! environment entirely.

use crate::export::sender::Endpoint;
use std::env;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Default collector host.
pub const DEFAULT_HOST: &str = "ingest.traceport.io";
/// Default collector port.
pub const DEFAULT_PORT: u16 = 32714;

const ENV_TOKEN: &str = "TRACEPORT_TOKEN";
const ENV_HOST: &str = "TRACEPORT_HOST";
const ENV_PORT: &str = "TRACEPORT_PORT";
const ENV_SERVICE_NAME: &str = "TRACEPORT_SERVICE_NAME";
const ENV_CONFIG_FILE: &str = "TRACEPORT_CONFIG";

const PROP_TOKEN: &str = "traceport.token";
const PROP_HOST: &str = "traceport.host";
const PROP_PORT: &str = "traceport.port";
const PROP_SERVICE_NAME: &str = "traceport.service.name";

/// Resolved tracer settings.
///
/// An empty (or whitespace-only) access token disables the tracer: spans
/// become no-ops and no delivery pipeline is started.
#[derive(Clone, Debug)]
pub struct Config {
    access_token: String,
    host: String,
    port: u16,
    service_name: Option<String>,
    endpoints: Vec<Endpoint>,
}

impl Config {
    /// Start building a configuration programmatically.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Resolve a configuration from the process environment.
    ///
    /// The `TRACEPORT_*` variables are read first; if `TRACEPORT_CONFIG`
    /// names a readable properties file its entries are applied on top and
    /// win for every key they set. An unreadable file is logged and skipped
    /// rather than treated as fatal.
    pub fn from_env() -> Config {
        let mut builder = ConfigBuilder::default();

        if let Ok(token) = env::var(ENV_TOKEN) {
            builder = builder.with_access_token(token);
        }
        if let Ok(host) = env::var(ENV_HOST) {
            builder = builder.with_host(host);
        }
        if let Ok(port) = env::var(ENV_PORT) {
            match port.trim().parse::<u16>() {
                Ok(port) => builder = builder.with_port(port),
                Err(_) => warn!(value = %port, "ignoring unparsable {ENV_PORT}"),
            }
        }
        if let Ok(name) = env::var(ENV_SERVICE_NAME) {
            builder = builder.with_service_name(name);
        }

        if let Ok(path) = env::var(ENV_CONFIG_FILE) {
            match fs::read_to_string(Path::new(&path)) {
                Ok(contents) => builder = builder.apply_properties(&contents),
                Err(err) => {
                    warn!(path = %path, error = %err, "could not read configuration file");
                }
            }
        }

        builder.build()
    }

    /// Whether the tracer should record and deliver spans.
    pub fn is_enabled(&self) -> bool {
        !self.access_token.trim().is_empty()
    }

    /// The collector access token, possibly empty.
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// The collector host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The collector port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The service name to advertise, if any.
    pub fn service_name(&self) -> Option<&str> {
        self.service_name.as_deref()
    }

    /// The collector endpoints to deliver to, in failover order.
    ///
    /// Falls back to the single host/port endpoint when no explicit
    /// endpoints were configured.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        if self.endpoints.is_empty() {
            vec![Endpoint::new(self.host.clone(), self.port)]
        } else {
            self.endpoints.clone()
        }
    }
}

/// Builder for [`Config`].
#[derive(Clone, Debug, Default)]
pub struct ConfigBuilder {
    access_token: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    service_name: Option<String>,
    endpoints: Vec<Endpoint>,
}

impl ConfigBuilder {
    /// Set the collector access token.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Set the collector host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set the collector port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the advertised service name.
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Add an explicit collector endpoint. Endpoints are tried in the order
    /// they were added; adding any endpoint supersedes the host/port pair.
    pub fn with_endpoint(mut self, host: impl Into<String>, port: u16) -> Self {
        self.endpoints.push(Endpoint::new(host.into(), port));
        self
    }

    /// Apply `key=value` properties, java-properties style. Lines starting
    /// with `#` or `!` are comments; unknown keys are ignored.
    fn apply_properties(mut self, contents: &str) -> Self {
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let (key, value) = (key.trim(), value.trim());
            match key {
                PROP_TOKEN => self.access_token = Some(value.to_string()),
                PROP_HOST => self.host = Some(value.to_string()),
                PROP_PORT => match value.parse::<u16>() {
                    Ok(port) => self.port = Some(port),
                    Err(_) => warn!(value = %value, "ignoring unparsable {PROP_PORT}"),
                },
                PROP_SERVICE_NAME => self.service_name = Some(value.to_string()),
                _ => debug!(key = %key, "ignoring unknown configuration key"),
            }
        }
        self
    }

    /// Finalize the configuration, filling unset fields with defaults.
    pub fn build(self) -> Config {
        Config {
            access_token: self.access_token.unwrap_or_default(),
            host: self.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: self.port.unwrap_or(DEFAULT_PORT),
            service_name: self.service_name,
            endpoints: self.endpoints,
        }
    }
}
