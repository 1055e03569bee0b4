//! A minimal scripted AMQP server for driving seed scenarios against a real
//! [`blocking_amqp::Connection`] without a live broker. Each test spawns one
//! of these on an ephemeral `127.0.0.1` port and hands the real client the
//! resulting address.

use amq_protocol::frame::{gen_frame, parse_frame, AMQPContentHeader, AMQPFrame};
use amq_protocol::protocol::{basic, channel as chan, connection, AMQPClass};
use amq_protocol::types::FieldTable;
use cookie_factory::gen_simple;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

pub struct FakeBroker {
    pub addr: SocketAddr,
    handle: Option<JoinHandle<()>>,
    done_tx: Option<mpsc::Sender<()>>,
}

impl FakeBroker {
    /// Binds to an ephemeral port and runs `script` against the first
    /// incoming connection on a background thread.
    ///
    /// The socket is kept open (not dropped) once `script` returns, until
    /// [`FakeBroker::join`] is called — otherwise the broker side would
    /// close the connection the instant its last scripted write returns,
    /// racing the client's reader thread for whatever was just written.
    pub fn spawn(script: impl FnOnce(&mut BrokerConn) + Send + 'static) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake broker");
        let addr = listener.local_addr().expect("local_addr");
        let (done_tx, done_rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("fake-broker".into())
            .spawn(move || {
                let (stream, _) = listener.accept().expect("accept");
                let mut conn = BrokerConn::new(stream);
                script(&mut conn);
                let _ = done_rx.recv();
            })
            .expect("spawn fake broker thread");
        Self { addr, handle: Some(handle), done_tx: Some(done_tx) }
    }

    pub fn join(mut self) {
        if let Some(tx) = self.done_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// The broker side of one accepted connection: reads/writes raw AMQP frames.
pub struct BrokerConn {
    stream: TcpStream,
    buffer: Vec<u8>,
}

impl BrokerConn {
    fn new(stream: TcpStream) -> Self {
        Self { stream, buffer: Vec::new() }
    }

    pub fn read_frame(&mut self) -> AMQPFrame {
        let mut chunk = [0_u8; 4096];
        loop {
            if let Ok((rest, frame)) = parse_frame(&self.buffer[..]) {
                let consumed = self.buffer.len() - rest.len();
                self.buffer.drain(..consumed);
                return frame;
            }
            let n = self.stream.read(&mut chunk).expect("read from client");
            assert!(n > 0, "client closed the socket while broker script expected more frames");
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    pub fn write_frame(&mut self, frame: &AMQPFrame) {
        let bytes = gen_simple(gen_frame(frame), Vec::new()).expect("marshal frame");
        self.stream.write_all(&bytes).expect("write to client");
    }

    /// Consumes the client's protocol header and runs the standard
    /// Start/StartOk/Tune/TuneOk/Open/OpenOk handshake, reflecting back
    /// whatever heartbeat/frame-max the client proposed.
    pub fn handshake(&mut self) {
        assert!(matches!(self.read_frame(), AMQPFrame::ProtocolHeader(_)));

        self.write_frame(&AMQPFrame::Method(
            0,
            AMQPClass::Connection(connection::AMQPMethod::Start(connection::Start {
                version_major: 0,
                version_minor: 9,
                server_properties: FieldTable::default(),
                mechanisms: "PLAIN".into(),
                locales: "en_US".into(),
            })),
        ));
        assert!(matches!(
            self.read_frame(),
            AMQPFrame::Method(0, AMQPClass::Connection(connection::AMQPMethod::StartOk(_)))
        ));

        self.write_frame(&AMQPFrame::Method(
            0,
            AMQPClass::Connection(connection::AMQPMethod::Tune(connection::Tune {
                channel_max: 0,
                frame_max: 131_072,
                heartbeat: 0,
            })),
        ));
        assert!(matches!(
            self.read_frame(),
            AMQPFrame::Method(0, AMQPClass::Connection(connection::AMQPMethod::TuneOk(_)))
        ));
        assert!(matches!(
            self.read_frame(),
            AMQPFrame::Method(0, AMQPClass::Connection(connection::AMQPMethod::Open(_)))
        ));

        self.write_frame(&AMQPFrame::Method(
            0,
            AMQPClass::Connection(connection::AMQPMethod::OpenOk(connection::OpenOk {})),
        ));
    }

    /// Reads a `Channel.Open` on `channel_id` and replies `Channel.OpenOk`.
    pub fn expect_channel_open(&mut self, channel_id: u16) {
        assert!(matches!(
            self.read_frame(),
            AMQPFrame::Method(id, AMQPClass::Channel(chan::AMQPMethod::Open(_))) if id == channel_id
        ));
        self.write_frame(&AMQPFrame::Method(
            channel_id,
            AMQPClass::Channel(chan::AMQPMethod::OpenOk(chan::OpenOk {})),
        ));
    }

    /// Sends a full content-frame triple (`lead` method + header + body
    /// chunks), chunking the body the way a real broker respecting
    /// `frame_max` would.
    ///
    /// Each integration test file compiles this module as its own crate, so
    /// any single test binary that doesn't call this triggers a spurious
    /// dead-code lint even though other seed scenarios do.
    #[allow(dead_code)]
    pub fn send_content(&mut self, channel_id: u16, lead: AMQPClass, properties: basic::AMQPProperties, body: &[u8]) {
        self.write_frame(&AMQPFrame::Method(channel_id, lead));
        self.write_frame(&AMQPFrame::Header(
            channel_id,
            AMQPContentHeader {
                class_id: 60,
                body_size: body.len() as u64,
                properties,
            },
        ));
        for chunk in body.chunks(131_064) {
            self.write_frame(&AMQPFrame::Body(channel_id, chunk.to_vec()));
        }
    }
}

pub fn connection_properties(addr: SocketAddr) -> blocking_amqp::ConnectionProperties {
    blocking_amqp::ConnectionProperties::new(addr.ip().to_string(), addr.port(), "guest", "guest")
}
