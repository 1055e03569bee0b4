use amq_protocol::protocol::AMQPError;
use std::{io, sync::Arc};
use thiserror::Error;

/// Result type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by this crate.
///
/// Mirrors the taxonomy: invalid argument (raised immediately, no state
/// change), connection error (latched on the connection), channel error
/// (latched on the channel), message error (latched on the channel but
/// doesn't close it), plus a passthrough for broker-reported AMQP errors.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A user call was given an argument that fails validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The connection failed, was closed by the broker with a non-200 code,
    /// or a handshake step failed.
    #[error("connection error: {0}")]
    ConnectionError(String),
    /// The channel was closed by the broker with a non-200 code, an RPC
    /// timed out, or an operation was attempted on a closed channel.
    #[error("channel error: {0}")]
    ChannelError(String),
    /// A `Basic.Return` was received, a publisher confirm came back
    /// negative, or `ack`/`nack`/`reject` was called on an outbound message.
    #[error("message error: {0}")]
    MessageError(String),
    /// The broker reported an AMQP-level error on a method frame.
    #[error("protocol error: {0}")]
    ProtocolError(AMQPError),
    /// The underlying socket failed.
    #[error("io error: {0}")]
    IOError(#[from] Arc<io::Error>),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::IOError(Arc::new(err))
    }
}
