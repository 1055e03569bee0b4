use crate::{
    channel::Channel,
    channel0::{Channel0, ConnState},
    config::{ChannelOptions, ConnectionProperties},
    error::{Error, Result},
    io::{self, IO},
};
use amq_protocol::types::FieldTable;
use parking_lot::Mutex;
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tracing::{debug, warn};

const OPEN_TIMEOUT: Duration = Duration::from_secs(60);

type ChannelTable = Arc<Mutex<BTreeMap<u16, Channel>>>;

/// A connection to a broker: one TCP/TLS socket, one reader thread, and the
/// channel-0 handshake/heartbeat state machine.
///
/// Grounded on `amqpstorm/connection.py`: [`Connection::open`] drives the
/// handshake the same way `Connection.open` does, `channel` allocates and
/// registers a [`Channel`] the same way, and inbound frames are routed to
/// channel 0 or the matching channel table entry exactly as `_read_buffer`
/// does. Channel-id allocation differs: rather than `len(channels) + 1`,
/// which never reuses an id freed by a closed channel, this picks the
/// smallest unused positive integer.
pub struct Connection {
    io: Arc<IO>,
    channel0: Arc<Channel0>,
    channels: ChannelTable,
}

impl Connection {
    /// Connects and performs the full AMQP handshake, blocking until the
    /// connection is open or the handshake fails.
    pub fn open(props: ConnectionProperties) -> Result<Self> {
        props.validate()?;

        // `IO::open` needs `on_read`/`on_error` before `Channel0` exists, and
        // `Channel0::new` needs the `IO` it will write to: break the cycle
        // with a slot the closures capture and the constructor fills in once
        // the socket is up.
        let channel0_slot: Arc<Mutex<Option<Arc<Channel0>>>> = Arc::new(Mutex::new(None));
        let channels: ChannelTable = Arc::new(Mutex::new(BTreeMap::new()));

        let dispatch_channel0 = channel0_slot.clone();
        let dispatch_channels = channels.clone();
        let on_read = move |buffer: Vec<u8>| {
            io::parse_frames(buffer, |frame| {
                let channel_id = frame.channel_id();
                if channel_id == 0 {
                    if let Some(channel0) = dispatch_channel0.lock().as_ref() {
                        channel0.on_frame(frame);
                    }
                } else if let Some(channel) = dispatch_channels.lock().get(&channel_id) {
                    channel.on_frame(frame);
                } else {
                    warn!(channel_id, "frame for unknown channel, dropping");
                }
            })
        };

        let error_channel0 = channel0_slot.clone();
        let error_channels = channels.clone();
        let on_error = move |err: Error| {
            if let Some(channel0) = error_channel0.lock().as_ref() {
                channel0.fail(err.clone());
            }
            for channel in error_channels.lock().values() {
                channel.on_connection_error(err.clone());
            }
        };

        let io = IO::open(&props, on_read, on_error)?;
        let channel0 = Channel0::new(io.clone(), props);
        *channel0_slot.lock() = Some(channel0.clone());
        channel0.open(OPEN_TIMEOUT)?;

        Ok(Self { io, channel0, channels })
    }

    /// Opens a new channel with default [`ChannelOptions`].
    pub fn channel(&self) -> Result<Channel> {
        self.channel_with_options(ChannelOptions::default())
    }

    /// Opens a new channel, allocating the smallest unused positive channel id.
    pub fn channel_with_options(&self, options: ChannelOptions) -> Result<Channel> {
        self.check_for_errors()?;
        let channel = {
            let mut channels = self.channels.lock();
            let id = next_channel_id(&channels)?;
            let channel = Channel::new(id, self.io.clone(), self.channel0.clone(), self.channels.clone(), options);
            // Inserted before the handshake so the reader thread can already
            // route this channel's `Channel.OpenOk` to it.
            channels.insert(id, channel.clone());
            channel
        };
        if let Err(err) = channel.open() {
            self.channels.lock().remove(&channel.id());
            return Err(err);
        }
        debug!(channel_id = channel.id(), "channel opened");
        Ok(channel)
    }

    /// Closes every open channel, then sends `Connection.Close` and tears
    /// down the socket.
    pub fn close(&self) -> Result<()> {
        debug!("connection closing");
        let open_channels: Vec<Channel> = self
            .channels
            .lock()
            .values()
            .filter(|channel| channel.is_open())
            .cloned()
            .collect();
        for channel in open_channels {
            let _ = channel.close(0, "");
        }
        if self.channel0.state() != ConnState::Closed {
            let _ = self.channel0.send_close(200, "connection closed by client");
        }
        self.io.close();
        debug!("connection closed");
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.channel0.state() == ConnState::Open
    }

    pub fn is_closed(&self) -> bool {
        self.channel0.state() == ConnState::Closed
    }

    /// True while the broker has throttled publishing via `Connection.Blocked`.
    pub fn is_blocked(&self) -> bool {
        self.channel0.is_blocked()
    }

    /// The server properties the broker announced on `Connection.Start`.
    pub fn server_properties(&self) -> FieldTable {
        self.channel0.server_properties()
    }

    pub fn check_for_errors(&self) -> Result<()> {
        if let Some(err) = self.channel0.latched_error() {
            return Err(err);
        }
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.io.close();
    }
}

fn next_channel_id(table: &BTreeMap<u16, Channel>) -> Result<u16> {
    next_unused_id(table.keys().copied())
}

fn next_unused_id(used: impl Iterator<Item = u16>) -> Result<u16> {
    let mut id: u16 = 1;
    for existing in used {
        if existing < id {
            continue;
        } else if existing == id {
            id = id.checked_add(1).ok_or_else(|| Error::ConnectionError("channel id space exhausted".into()))?;
        } else {
            break;
        }
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_unused_id_fills_gaps() {
        assert_eq!(next_unused_id(std::iter::empty()).unwrap(), 1);
        assert_eq!(next_unused_id([1, 2, 4].into_iter()).unwrap(), 3);
        assert_eq!(next_unused_id([2, 3].into_iter()).unwrap(), 1);
        assert_eq!(next_unused_id([1, 2, 3].into_iter()).unwrap(), 4);
    }
}
