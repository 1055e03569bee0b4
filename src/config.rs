use crate::error::{Error, Result};
use amq_protocol::{
    tcp::OwnedTLSConfig,
    types::{AMQPValue, FieldTable, LongString},
    uri::{AMQPScheme, AMQPUri},
};
use std::time::Duration;

/// Default frame size advertised on `Connection.TuneOk` when the broker
/// doesn't impose a smaller one.
pub const FRAME_MAX: u32 = 131_072;

/// TLS configuration, used when [`ConnectionProperties::ssl`] is set.
///
/// Wraps the owned variant of `amq-protocol-tcp`'s [`OwnedTLSConfig`] so it
/// can be stored on [`ConnectionProperties`] past the lifetime of the
/// connecting call.
#[derive(Clone, Debug, Default)]
pub struct SslOptions {
    pub(crate) config: OwnedTLSConfig,
}

/// Validated connection parameters.
///
/// Constructed either field-by-field via [`ConnectionProperties::new`] and
/// its `with_*` builders, or parsed from an `amqp://`/`amqps://` URI via
/// [`ConnectionProperties::from_uri`].
#[derive(Clone, Debug)]
pub struct ConnectionProperties {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) username: String,
    pub(crate) password: String,
    pub(crate) vhost: String,
    pub(crate) heartbeat: u16,
    pub(crate) timeout: Option<Duration>,
    pub(crate) locale: String,
    pub(crate) client_properties: FieldTable,
    pub(crate) ssl: Option<SslOptions>,
}

impl ConnectionProperties {
    /// Create connection parameters for a plaintext connection to `host:port`.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
            vhost: "/".into(),
            heartbeat: 60,
            timeout: None,
            locale: "en_US".into(),
            client_properties: FieldTable::default(),
            ssl: None,
        }
    }

    /// Parse connection parameters from an `amqp://` or `amqps://` URI.
    pub fn from_uri(uri: &str) -> Result<Self> {
        let uri: AMQPUri = uri
            .parse()
            .map_err(|err| Error::InvalidArgument(format!("invalid AMQP URI: {err}")))?;
        let ssl = match uri.scheme {
            AMQPScheme::AMQP => None,
            AMQPScheme::AMQPS => Some(SslOptions::default()),
        };
        Ok(Self {
            host: uri.authority.host,
            port: uri.authority.port,
            username: uri.authority.userinfo.username,
            password: uri.authority.userinfo.password,
            vhost: uri.vhost,
            heartbeat: uri.query.heartbeat.unwrap_or(60),
            timeout: uri.query.connection_timeout.map(Duration::from_millis),
            locale: "en_US".into(),
            client_properties: FieldTable::default(),
            ssl,
        })
    }

    /// Override the virtual host (default `/`).
    pub fn with_vhost(mut self, vhost: impl Into<String>) -> Self {
        self.vhost = vhost.into();
        self
    }

    /// Override the heartbeat interval, in seconds (default 60, 0 disables it).
    pub fn with_heartbeat(mut self, heartbeat: u16) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Set a socket read/write timeout (default: no timeout).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Enable TLS with the given configuration.
    pub fn with_ssl(mut self, ssl: SslOptions) -> Self {
        self.ssl = Some(ssl);
        self
    }

    /// Add or override a `StartOk` client property.
    pub fn with_client_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.client_properties
            .insert(key.into().into(), AMQPValue::LongString(LongString::from(value.into())));
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::InvalidArgument("hostname should be a non-empty string".into()));
        }
        if self.username.is_empty() {
            return Err(Error::InvalidArgument("username should be a non-empty string".into()));
        }
        Ok(())
    }
}

/// Per-channel configuration.
#[derive(Clone, Copy, Debug)]
pub struct ChannelOptions {
    /// How long a synchronous method waits for its response before the
    /// channel latches a timeout error and closes.
    pub rpc_timeout: Duration,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            rpc_timeout: Duration::from_secs(360),
        }
    }
}
