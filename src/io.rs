use crate::{
    config::ConnectionProperties,
    error::{Error, Result},
    stream::TcpStream,
};
use amq_protocol::{
    frame::{gen_frame, parse_frame, AMQPFrame},
    tcp::AMQPUriTcpExt,
    uri::{AMQPAuthority, AMQPQueryString, AMQPScheme, AMQPUri, AMQPUserInfo},
};
use cookie_factory::gen_simple;
use parking_lot::Mutex;
use std::{
    io::{ErrorKind, Read, Write},
    net::Shutdown,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};
use tracing::{debug, error, trace};

/// How long the reader sleeps between non-blocking read attempts while the
/// socket has nothing pending, *without* holding `write_lock` — so a writer
/// is never stuck behind an in-flight read.
const READ_POLL_INTERVAL: Duration = Duration::from_millis(5);
const READ_BUFFER_SIZE: usize = 8192;

pub(crate) fn marshal(frame: &AMQPFrame) -> Result<Vec<u8>> {
    gen_simple(gen_frame(frame), Vec::new())
        .map_err(|err| Error::ConnectionError(format!("failed to marshal frame: {err}")))
}

fn amqp_uri(props: &ConnectionProperties) -> AMQPUri {
    AMQPUri {
        scheme: if props.ssl.is_some() {
            AMQPScheme::AMQPS
        } else {
            AMQPScheme::AMQP
        },
        authority: AMQPAuthority {
            userinfo: AMQPUserInfo {
                username: props.username.clone(),
                password: props.password.clone(),
            },
            host: props.host.clone(),
            port: props.port,
        },
        vhost: props.vhost.clone(),
        query: AMQPQueryString {
            connection_timeout: props.timeout.map(|t| t.as_millis() as u64),
            ..Default::default()
        },
    }
}

/// Owns the TCP/TLS socket for a connection.
///
/// `connect_with_config` performs the connect and TLS handshake synchronously
/// before returning, leaving the socket in non-blocking mode. `open` keeps it
/// that way: the reader thread polls with short, lock-free sleeps between
/// non-blocking read attempts rather than parking inside a long blocking read
/// while holding `write_lock`, so a writer is never stalled behind one.
pub(crate) struct IO {
    write_lock: Mutex<Option<TcpStream>>,
    closed: AtomicBool,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl IO {
    pub(crate) fn open<R, E>(props: &ConnectionProperties, mut on_read: R, on_error: E) -> Result<Arc<Self>>
    where
        R: FnMut(Vec<u8>) -> Vec<u8> + Send + 'static,
        E: Fn(Error) + Send + 'static,
    {
        let uri = amqp_uri(props);
        let tls_config = props
            .ssl
            .as_ref()
            .map(|ssl| ssl.config.as_ref())
            .unwrap_or_default();

        let handshake_result = uri.connect_with_config(tls_config);
        let stream = TcpStream::from_handshake(handshake_result)?;

        let io = Arc::new(Self {
            write_lock: Mutex::new(Some(stream)),
            closed: AtomicBool::new(false),
            reader: Mutex::new(None),
        });

        let reader_io = io.clone();
        let handle = thread::Builder::new()
            .name("amqp-io-reader".into())
            .spawn(move || reader_io.read_loop(&mut on_read, on_error))
            .map_err(|err| Error::ConnectionError(format!("failed to spawn reader thread: {err}")))?;
        *io.reader.lock() = Some(handle);

        Ok(io)
    }

    fn read_loop<R, E>(&self, on_read: &mut R, on_error: E)
    where
        R: FnMut(Vec<u8>) -> Vec<u8>,
        E: Fn(Error),
    {
        let mut pending = Vec::new();
        let mut chunk = [0_u8; READ_BUFFER_SIZE];
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return;
            }
            let read = {
                let mut guard = self.write_lock.lock();
                match guard.as_mut() {
                    Some(stream) => stream.read(&mut chunk),
                    None => return,
                }
            };
            match read {
                Ok(0) => {
                    if self.closed.load(Ordering::SeqCst) {
                        return;
                    }
                    on_error(Error::ConnectionError("connection closed by peer".into()));
                    return;
                }
                Ok(n) => {
                    pending.extend_from_slice(&chunk[..n]);
                    pending = on_read(pending);
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut => {
                    trace!("nothing to read yet, polling again");
                    thread::sleep(READ_POLL_INTERVAL);
                    continue;
                }
                Err(err) => {
                    if self.closed.load(Ordering::SeqCst) {
                        return;
                    }
                    error!(error = %err, "socket read failed");
                    on_error(err.into());
                    return;
                }
            }
        }
    }

    /// Serializes and writes a single frame. Concurrent calls never interleave.
    pub(crate) fn write_frame(&self, frame: &AMQPFrame) -> Result<()> {
        let bytes = marshal(frame)?;
        self.write_to_socket(&bytes)
    }

    pub(crate) fn write_frames(&self, frames: &[AMQPFrame]) -> Result<()> {
        let mut bytes = Vec::new();
        for frame in frames {
            bytes.extend(marshal(frame)?);
        }
        self.write_to_socket(&bytes)
    }

    pub(crate) fn write_to_socket(&self, bytes: &[u8]) -> Result<()> {
        let mut guard = self.write_lock.lock();
        match guard.as_mut() {
            Some(stream) => stream.write_all(bytes).map_err(Error::from),
            None => Err(Error::ConnectionError("connection closed".into())),
        }
    }

    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(stream) = self.write_lock.lock().as_ref() {
            let _ = stream.inner().shutdown(Shutdown::Both);
        }
        if let Some(handle) = self.reader.lock().take() {
            let _ = handle.join();
        }
        debug!("io closed");
    }
}

impl Drop for IO {
    fn drop(&mut self) {
        self.close();
    }
}

/// Parses as many complete frames as possible out of `buffer`, returning the
/// unconsumed tail. A partial frame at the end is preserved across reads.
pub(crate) fn parse_frames(buffer: Vec<u8>, mut on_frame: impl FnMut(AMQPFrame)) -> Vec<u8> {
    let mut offset = 0;
    while let Ok((rest, frame)) = parse_frame(&buffer[offset..]) {
        let consumed = buffer.len() - offset - rest.len();
        offset += consumed;
        on_frame(frame);
    }
    buffer[offset..].to_vec()
}
