use crate::error::{Error, Result};
use amq_protocol::tcp;
use std::{
    fmt,
    io::{self, IoSlice, IoSliceMut, Read, Write},
};

/// Thin wrapper around `amq-protocol-tcp`'s `TcpStream` (itself an enum over
/// plaintext and the various TLS backends).
///
/// `connect_with_config` performs the whole connect-and-handshake sequence
/// synchronously on a blocking socket before flipping it to non-blocking, so
/// by the time a [`tcp::HandshakeResult`] reaches us it is either a fully
/// connected stream or a genuine failure; there is no partial-handshake
/// state to retry here.
pub struct TcpStream(tcp::TcpStream);

impl TcpStream {
    pub(crate) fn from_handshake(result: tcp::HandshakeResult) -> Result<Self> {
        result
            .map(Self)
            .map_err(|err| Error::ConnectionError(format!("TLS handshake failed: {err}")))
    }

    pub(crate) fn inner(&self) -> &tcp::TcpStream {
        &self.0
    }
}

impl Read for TcpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }

    fn read_vectored(&mut self, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
        self.0.read_vectored(bufs)
    }

    fn read_to_end(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
        self.0.read_to_end(buf)
    }

    fn read_to_string(&mut self, buf: &mut String) -> io::Result<usize> {
        self.0.read_to_string(buf)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.0.read_exact(buf)
    }
}

impl Write for TcpStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }

    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        self.0.write_vectored(bufs)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.0.write_all(buf)
    }

    fn write_fmt(&mut self, fmt: fmt::Arguments<'_>) -> io::Result<()> {
        self.0.write_fmt(fmt)
    }
}
