use crate::{
    channel::Channel,
    error::{Error, Result},
};
use amq_protocol::protocol::basic::AMQPProperties;

/// Delivery metadata attached to a broker-originated message.
///
/// Populated from `Basic.Deliver` or `Basic.GetOk`; absent on messages the
/// user constructs for publishing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryInfo {
    pub delivery_tag: u64,
    pub consumer_tag: String,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
}

/// A snapshot view of a [`Message`], for callers that want an owned,
/// struct-shaped copy rather than borrowing through accessors.
#[derive(Clone, Debug)]
pub struct MessageSnapshot {
    pub body: Vec<u8>,
    pub method: Option<DeliveryInfo>,
    pub properties: AMQPProperties,
}

/// A message body plus its delivery metadata and properties.
///
/// Grounded on `amqpstorm/message.py`: `ack`/`nack`/`reject` require a
/// `method` (the message must have come from the broker), and `publish`
/// re-emits the body and properties on whatever channel produced this
/// message or was supplied at construction.
#[derive(Clone)]
pub struct Message {
    body: Vec<u8>,
    method: Option<DeliveryInfo>,
    properties: AMQPProperties,
    channel: Option<Channel>,
    auto_decode: bool,
}

impl Message {
    pub(crate) fn new(
        body: Vec<u8>,
        method: Option<DeliveryInfo>,
        properties: AMQPProperties,
        channel: Option<Channel>,
        auto_decode: bool,
    ) -> Self {
        Self {
            body,
            method,
            properties,
            channel,
            auto_decode,
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Best-effort UTF-8 view of the body when `auto_decode` is enabled.
    /// Returns `None` on non-UTF-8 content or when disabled; `body()` always
    /// returns the original bytes regardless.
    pub fn body_str(&self) -> Option<&str> {
        self.auto_decode.then(|| std::str::from_utf8(&self.body).ok()).flatten()
    }

    pub fn method(&self) -> Option<&DeliveryInfo> {
        self.method.as_ref()
    }

    pub fn properties(&self) -> &AMQPProperties {
        &self.properties
    }

    pub fn to_dict(&self) -> MessageSnapshot {
        MessageSnapshot {
            body: self.body.clone(),
            method: self.method.clone(),
            properties: self.properties.clone(),
        }
    }

    pub fn to_tuple(&self) -> (Vec<u8>, Option<DeliveryInfo>, AMQPProperties) {
        (self.body.clone(), self.method.clone(), self.properties.clone())
    }

    fn require_delivery(&self) -> Result<(&Channel, &DeliveryInfo)> {
        let channel = self
            .channel
            .as_ref()
            .ok_or_else(|| Error::MessageError("message has no channel to acknowledge on".into()))?;
        let method = self
            .method
            .as_ref()
            .ok_or_else(|| Error::MessageError("message has no delivery to acknowledge".into()))?;
        Ok((channel, method))
    }

    pub fn ack(&self) -> Result<()> {
        let (channel, method) = self.require_delivery()?;
        channel.basic_ack(method.delivery_tag, false)
    }

    pub fn nack(&self, requeue: bool) -> Result<()> {
        let (channel, method) = self.require_delivery()?;
        channel.basic_nack(method.delivery_tag, false, requeue)
    }

    pub fn reject(&self, requeue: bool) -> Result<()> {
        let (channel, method) = self.require_delivery()?;
        channel.basic_reject(method.delivery_tag, requeue)
    }

    pub fn publish(&self, routing_key: &str, exchange: &str, mandatory: bool, immediate: bool) -> Result<()> {
        let channel = self
            .channel
            .as_ref()
            .ok_or_else(|| Error::MessageError("message has no channel to publish on".into()))?;
        channel.basic_publish(exchange, routing_key, &self.body, self.properties.clone(), mandatory, immediate)
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("body_len", &self.body.len())
            .field("method", &self.method)
            .field("properties", &self.properties)
            .finish()
    }
}
