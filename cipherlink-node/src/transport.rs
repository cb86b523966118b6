//! TCP stream standing in for the serial line
//!
//! The stream is used as a raw byte pipe: no framing, reads never block. Establishing it
//! is async (and retried for the dialling side); the link itself then runs on a blocking
//! worker over the std stream.

use cipherlink_core::config::LinkConfig;
use cipherlink_core::io::Serial;
use cipherlink_core::retry::RetryPolicy;
use cipherlink_core::{Error, Role};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;
use tracing::{debug, info};

const READ_CHUNK: usize = 512;
const WRITE_BACKOFF: Duration = Duration::from_millis(1);

/// Accept one peer or dial out, depending on configuration
pub async fn establish(config: &LinkConfig, role: Role) -> cipherlink_core::Result<TcpStream> {
    let stream = match (&config.listen_address, &config.connect_address) {
        (Some(addr), _) => {
            let listener = tokio::net::TcpListener::bind(addr).await?;
            info!(%role, address = %addr, "waiting for peer");
            let (stream, peer) = listener.accept().await?;
            info!(%peer, "peer connected");
            stream
        }
        (None, Some(addr)) => {
            info!(%role, address = %addr, "dialling peer");
            let stream = RetryPolicy::for_link(config)
                .execute("connect", || async move {
                    tokio::net::TcpStream::connect(addr.as_str())
                        .await
                        .map_err(Error::from)
                })
                .await?;
            info!(address = %addr, "connected to peer");
            stream
        }
        (None, None) => {
            return Err(Error::Config("no link address configured".to_string()));
        }
    };

    let stream = stream.into_std()?;
    stream.set_nonblocking(true)?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Non-blocking [`Serial`] view of a TCP stream
pub struct TcpSerial {
    stream: TcpStream,
    inbound: VecDeque<u8>,
    outbound: Vec<u8>,
    eof: bool,
}

impl TcpSerial {
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(Self {
            stream,
            inbound: VecDeque::new(),
            outbound: Vec::new(),
            eof: false,
        })
    }

    /// Pull whatever the socket has without blocking
    ///
    /// Bytes received before the peer closed stay readable; end of stream is reported
    /// only once they are consumed.
    fn fill(&mut self) -> io::Result<()> {
        if !self.eof {
            self.read_pending()?;
        }
        if self.eof && self.inbound.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "peer closed the link",
            ));
        }
        Ok(())
    }

    fn read_pending(&mut self) -> io::Result<()> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    debug!(queued = self.inbound.len(), "peer closed the link");
                    self.eof = true;
                    return Ok(());
                }
                Ok(n) => self.inbound.extend(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }
}

impl Serial for TcpSerial {
    fn available(&mut self) -> io::Result<usize> {
        self.fill()?;
        Ok(self.inbound.len())
    }

    fn read_byte(&mut self) -> io::Result<u8> {
        if self.inbound.is_empty() {
            self.fill()?;
        }
        self.inbound
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::WouldBlock, "no byte available"))
    }

    fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        self.outbound.push(byte);
        Ok(())
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.outbound.extend_from_slice(bytes);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut written = 0;
        while written < self.outbound.len() {
            match self.stream.write(&self.outbound[written..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => std::thread::sleep(WRITE_BACKOFF),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        if written > 0 {
            debug!(bytes = written, "flushed to link");
        }
        self.outbound.clear();
        Ok(())
    }
}
