use crate::{
    config::{ConnectionProperties, FRAME_MAX},
    error::{Error, Result},
    io::IO,
};
use amq_protocol::{
    frame::{AMQPFrame, ProtocolVersion},
    protocol::{connection, AMQPClass, AMQPError},
    types::{AMQPValue, FieldTable, LongString},
};
use parking_lot::{Condvar, Mutex};
use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, trace, warn};

const PACKAGE_NAME: &str = "blocking-amqp";
const PACKAGE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum ConnState {
    Init,
    WaitStart,
    WaitTune,
    WaitOpenOk,
    Open,
    Closed,
}

struct Shared {
    state: ConnState,
    error: Option<Error>,
    is_blocked: bool,
    server_properties: FieldTable,
    frame_max: u32,
}

/// Drives the connection-level handshake and heartbeat on channel 0.
///
/// Grounded on `amqpstorm/channel0.py`: the `on_frame` dispatch table and the
/// client-properties/capabilities payload follow it directly. The heartbeat
/// sender thread is an ambient addition; the reference implementation only
/// echoes inbound heartbeats.
pub(crate) struct Channel0 {
    io: Arc<IO>,
    props: ConnectionProperties,
    shared: Mutex<Shared>,
    condvar: Condvar,
}

impl Channel0 {
    pub(crate) fn new(io: Arc<IO>, props: ConnectionProperties) -> Arc<Self> {
        Arc::new(Self {
            io,
            props,
            shared: Mutex::new(Shared {
                state: ConnState::Init,
                error: None,
                is_blocked: false,
                server_properties: FieldTable::default(),
                frame_max: FRAME_MAX,
            }),
            condvar: Condvar::new(),
        })
    }

    pub(crate) fn state(&self) -> ConnState {
        self.shared.lock().state
    }

    pub(crate) fn is_blocked(&self) -> bool {
        self.shared.lock().is_blocked
    }

    pub(crate) fn server_properties(&self) -> FieldTable {
        self.shared.lock().server_properties.clone()
    }

    pub(crate) fn latched_error(&self) -> Option<Error> {
        self.shared.lock().error.clone()
    }

    /// The negotiated `frame-max`, used by channels to chunk `Basic.Publish` bodies.
    pub(crate) fn frame_max(&self) -> u32 {
        self.shared.lock().frame_max
    }

    pub(crate) fn fail(&self, err: Error) {
        let mut shared = self.shared.lock();
        shared.state = ConnState::Closed;
        shared.error.get_or_insert(err);
        self.condvar.notify_all();
    }

    /// Writes the protocol header and blocks until the handshake reaches
    /// `Open`, a connection error is latched, or `timeout` elapses.
    pub(crate) fn open(self: &Arc<Self>, timeout: Duration) -> Result<()> {
        {
            let mut shared = self.shared.lock();
            shared.state = ConnState::WaitStart;
        }
        self.io
            .write_frame(&AMQPFrame::ProtocolHeader(ProtocolVersion::amqp_0_9_1()))?;

        let deadline = Instant::now() + timeout;
        let mut shared = self.shared.lock();
        loop {
            if let Some(err) = shared.error.clone() {
                return Err(err);
            }
            if shared.state == ConnState::Open {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::ConnectionError("timed out waiting for connection to open".into()));
            }
            self.condvar.wait_for(&mut shared, deadline - now);
        }
    }

    pub(crate) fn send_close(&self, reply_code: u16, reply_text: &str) -> Result<()> {
        self.io.write_frame(&AMQPFrame::Method(
            0,
            AMQPClass::Connection(connection::AMQPMethod::Close(connection::Close {
                reply_code,
                reply_text: reply_text.into(),
                class_id: 0,
                method_id: 0,
            })),
        ))
    }

    /// Dispatches a frame addressed to channel 0.
    pub(crate) fn on_frame(self: &Arc<Self>, frame: AMQPFrame) {
        match frame {
            AMQPFrame::Heartbeat => {
                trace!("echoing heartbeat");
                if let Err(err) = self.io.write_frame(&AMQPFrame::Heartbeat) {
                    warn!(error = %err, "failed to echo heartbeat");
                }
            }
            AMQPFrame::Method(_, AMQPClass::Connection(method)) => self.on_connection_method(method),
            other => warn!(frame = ?other, "dropping unexpected frame on channel 0"),
        }
    }

    fn on_connection_method(self: &Arc<Self>, method: connection::AMQPMethod) {
        use connection::AMQPMethod::*;
        match method {
            Start(start) => self.on_start(start),
            Tune(tune) => self.on_tune(tune),
            OpenOk(_) => self.on_open_ok(),
            Close(close) => self.on_close(close),
            Blocked(_) => self.shared.lock().is_blocked = true,
            Unblocked(_) => self.shared.lock().is_blocked = false,
            other => warn!(method = ?other, "dropping unexpected Connection method"),
        }
    }

    fn on_start(self: &Arc<Self>, start: connection::Start) {
        self.shared.lock().server_properties = start.server_properties;

        let response = format!("\0{}\0{}", self.props.username, self.props.password);
        let start_ok = connection::StartOk {
            client_properties: client_properties(),
            mechanism: "PLAIN".into(),
            response: LongString::from(response.into_bytes()),
            locale: self.props.locale.clone().into(),
        };
        self.shared.lock().state = ConnState::WaitTune;
        if let Err(err) = self.io.write_frame(&AMQPFrame::Method(
            0,
            AMQPClass::Connection(connection::AMQPMethod::StartOk(start_ok)),
        )) {
            self.fail(err);
        }
    }

    fn on_tune(self: &Arc<Self>, tune: connection::Tune) {
        let heartbeat = if tune.heartbeat == 0 {
            self.props.heartbeat
        } else {
            tune.heartbeat.min(self.props.heartbeat)
        };
        let frame_max = if tune.frame_max == 0 { FRAME_MAX } else { tune.frame_max.min(FRAME_MAX) };
        self.shared.lock().frame_max = frame_max;

        let tune_ok = connection::TuneOk {
            channel_max: 0,
            frame_max,
            heartbeat,
        };
        self.shared.lock().state = ConnState::WaitOpenOk;
        let result = self
            .io
            .write_frame(&AMQPFrame::Method(0, AMQPClass::Connection(connection::AMQPMethod::TuneOk(tune_ok))))
            .and_then(|()| {
                self.io.write_frame(&AMQPFrame::Method(
                    0,
                    AMQPClass::Connection(connection::AMQPMethod::Open(connection::Open {
                        virtual_host: self.props.vhost.clone().into(),
                    })),
                ))
            });
        if let Err(err) = result {
            self.fail(err);
            return;
        }
        if heartbeat > 0 {
            self.spawn_heartbeat_sender(heartbeat);
        }
    }

    fn on_open_ok(&self) {
        let mut shared = self.shared.lock();
        shared.state = ConnState::Open;
        self.condvar.notify_all();
    }

    fn on_close(&self, close: connection::Close) {
        let mut shared = self.shared.lock();
        shared.state = ConnState::Closed;
        if close.reply_code != 200 {
            let message = format!("{} (reply_code={})", close.reply_text.as_str(), close.reply_code);
            shared.error = Some(
                AMQPError::from_id(close.reply_code, close.reply_text)
                    .map(Error::ProtocolError)
                    .unwrap_or(Error::ConnectionError(message)),
            );
        }
        self.condvar.notify_all();
        let _ = self.io.write_frame(&AMQPFrame::Method(
            0,
            AMQPClass::Connection(connection::AMQPMethod::CloseOk(connection::CloseOk {})),
        ));
    }

    fn spawn_heartbeat_sender(self: &Arc<Self>, heartbeat: u16) {
        let channel0 = self.clone();
        let period = Duration::from_secs(u64::from(heartbeat.max(1)) / 2).max(Duration::from_secs(1));
        let thread_name = "amqp-heartbeat".to_string();
        let builder = thread::Builder::new().name(thread_name);
        let spawn_result = builder.spawn(move || loop {
            thread::sleep(period);
            if channel0.state() == ConnState::Closed {
                return;
            }
            if let Err(err) = channel0.io.write_frame(&AMQPFrame::Heartbeat) {
                debug!(error = %err, "heartbeat sender stopping");
                return;
            }
        });
        if let Err(err) = spawn_result {
            warn!(error = %err, "failed to start heartbeat sender thread");
        }
    }
}

fn client_properties() -> FieldTable {
    let mut capabilities = FieldTable::default();
    capabilities.insert("basic.nack".into(), AMQPValue::Boolean(true));
    capabilities.insert("connection.blocked".into(), AMQPValue::Boolean(true));
    capabilities.insert("publisher_confirms".into(), AMQPValue::Boolean(true));
    capabilities.insert("consumer_cancel_notify".into(), AMQPValue::Boolean(true));
    capabilities.insert("authentication_failure_close".into(), AMQPValue::Boolean(true));

    let mut props = FieldTable::default();
    props.insert("product".into(), AMQPValue::LongString(PACKAGE_NAME.into()));
    props.insert("platform".into(), AMQPValue::LongString(format!("rust {}", rust_version()).into()));
    props.insert("version".into(), AMQPValue::LongString(PACKAGE_VERSION.into()));
    props.insert(
        "information".into(),
        AMQPValue::LongString("https://crates.io/crates/blocking-amqp".into()),
    );
    props.insert("capabilities".into(), AMQPValue::FieldTable(capabilities));
    props
}

fn rust_version() -> &'static str {
    option_env!("CARGO_PKG_RUST_VERSION").unwrap_or("unknown")
}
