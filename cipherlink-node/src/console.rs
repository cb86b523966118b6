//! Terminal console
//!
//! Standard input is read on its own thread and handed over through a channel, so
//! `available()` never blocks the link loop. Line-buffered terminals deliver LF at the end
//! of a line; it is turned into the CR the channel treats as end of line.

use cipherlink_core::io::Serial;
use crossbeam::channel::{self, Receiver, TryRecvError};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::thread;
use tracing::{debug, warn};

/// [`Serial`] over the process's stdin and stdout
pub struct StdConsole<W: Write = io::Stdout> {
    input: Receiver<u8>,
    pending: VecDeque<u8>,
    output: W,
    closed: bool,
}

impl StdConsole {
    /// Start the stdin reader thread
    pub fn spawn() -> io::Result<Self> {
        let (tx, rx) = channel::unbounded();

        thread::Builder::new()
            .name("console-input".to_string())
            .spawn(move || {
                let stdin = io::stdin();
                let mut stdin = stdin.lock();
                let mut chunk = [0u8; 256];
                loop {
                    match stdin.read(&mut chunk) {
                        Ok(0) => {
                            debug!("console input closed");
                            return;
                        }
                        Ok(n) => {
                            for &byte in &chunk[..n] {
                                if tx.send(byte).is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                        Err(e) => {
                            warn!(error = %e, "console read failed");
                            return;
                        }
                    }
                }
            })?;

        Ok(Self::with_parts(rx, io::stdout()))
    }
}

impl<W: Write> StdConsole<W> {
    /// Console over an existing byte receiver and writer
    pub fn with_parts(input: Receiver<u8>, output: W) -> Self {
        Self {
            input,
            pending: VecDeque::new(),
            output,
            closed: false,
        }
    }

    /// Print a line outside the character stream
    pub fn announce(&mut self, line: &str) -> io::Result<()> {
        write!(self.output, "{}\r\n", line)?;
        self.output.flush()
    }

    fn collect(&mut self) {
        if self.closed {
            return;
        }
        loop {
            match self.input.try_recv() {
                Ok(b'\n') => self.pending.push_back(b'\r'),
                Ok(byte) => self.pending.push_back(byte),
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Disconnected) => {
                    self.closed = true;
                    return;
                }
            }
        }
    }
}

impl<W: Write> Serial for StdConsole<W> {
    fn available(&mut self) -> io::Result<usize> {
        self.collect();
        Ok(self.pending.len())
    }

    fn read_byte(&mut self) -> io::Result<u8> {
        self.collect();
        self.pending
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::WouldBlock, "no key pressed"))
    }

    fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        self.output.write_all(&[byte])
    }

    fn flush(&mut self) -> io::Result<()> {
        self.output.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_feed_becomes_carriage_return() {
        let (tx, rx) = channel::unbounded();
        let mut console = StdConsole::with_parts(rx, Vec::new());

        for &byte in b"hi\n" {
            tx.send(byte).unwrap();
        }
        assert_eq!(console.available().unwrap(), 3);
        assert_eq!(console.read_byte().unwrap(), b'h');
        assert_eq!(console.read_byte().unwrap(), b'i');
        assert_eq!(console.read_byte().unwrap(), b'\r');
        assert!(console.read_byte().is_err());
    }

    #[test]
    fn test_closed_input_is_just_quiet() {
        let (tx, rx) = channel::unbounded();
        let mut console = StdConsole::with_parts(rx, Vec::new());
        tx.send(b'x').unwrap();
        drop(tx);

        assert_eq!(console.available().unwrap(), 1);
        console.read_byte().unwrap();
        assert_eq!(console.available().unwrap(), 0);
    }

    #[test]
    fn test_output_and_announce() {
        let (_tx, rx) = channel::unbounded::<u8>();
        let mut console = StdConsole::with_parts(rx, Vec::new());
        console.announce("Server").unwrap();
        console.write_all(b"ok").unwrap();
        console.flush().unwrap();
        assert_eq!(console.output, b"Server\r\nok".to_vec());
    }
}
