//! A blocking, thread-based AMQP 0-9-1 client.
//!
//! Connections and channels are synchronous: every call either returns once
//! its effect (or response, for RPC methods) is known, or blocks up to a
//! configurable timeout. One background thread per connection reads the
//! socket and dispatches frames to the channel they belong to; all other
//! work happens on whatever thread calls into this crate.

mod channel;
mod channel0;
mod config;
mod connection;
mod error;
mod io;
mod message;
mod rpc;
mod stream;

pub use amq_protocol::{
    protocol::basic::AMQPProperties,
    types::{AMQPValue, FieldTable},
    uri::AMQPUri,
};
pub use channel::{Channel, InboundMessages};
pub use config::{ChannelOptions, ConnectionProperties, SslOptions, FRAME_MAX};
pub use connection::Connection;
pub use error::{Error, Result};
pub use message::{DeliveryInfo, Message, MessageSnapshot};
