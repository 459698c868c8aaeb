//! 4.A Connection / Socket Layer: line-oriented bidirectional
//! transport with an optional in-band TLS upgrade.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use crate::error::{MailError, MailResult};

/// The level a wire-protocol line should be logged at. Mirrors the
/// `log_level` parameter neomutt's `readln_d`/`write_d` take, since a
/// client may want every line at `TRACE` but capability negotiation at
/// `DEBUG`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
}

/// Outcome of `Connection::poll`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Ready,
    Timeout,
}

/// Byte-level transport abstraction. The real connection either reads
/// `TcpStream` or `native_tls::TlsStream<TcpStream>`; tests substitute
/// an in-memory duplex pair.
pub trait Transport: Send {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;
    /// Bytes immediately available without blocking, used by `empty()`
    /// and `poll()`. Implementations without a reliable underlying
    /// `FIONREAD` may approximate with a zero-timeout read.
    fn shutdown(&mut self);
}

impl Transport for TcpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(self, buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        Write::write_all(self, buf)
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }

    fn shutdown(&mut self) {
        let _ = TcpStream::shutdown(self, std::net::Shutdown::Both);
    }
}

impl Transport for native_tls::TlsStream<TcpStream> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(self, buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        Write::write_all(self, buf)
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.get_ref().set_read_timeout(timeout)
    }

    fn shutdown(&mut self) {
        let _ = native_tls::TlsStream::shutdown(self);
        let _ = self.get_ref().shutdown(std::net::Shutdown::Both);
    }
}

const INITIAL_LINE_CAPACITY: usize = 512;

/// Owns the transport: raw or TLS-wrapped socket, read buffer, last
/// read timestamp, and a security-strength indicator (0 if
/// plaintext). Exactly one driver session owns a `Connection` at a
/// time (§3).
pub struct Connection {
    socket: Box<dyn Transport>,
    host: String,
    port: u16,
    /// Bytes read from the socket but not yet consumed by a `readln`.
    pending: Vec<u8>,
    last_read: Option<Instant>,
    security_strength: u32,
}

impl Connection {
    /// Open a plaintext TCP connection.
    pub fn open(host: &str, port: u16, connect_timeout: Duration) -> MailResult<Connection> {
        let addr = format!("{host}:{port}");
        let mut last_err = None;
        for candidate in std::net::ToSocketAddrs::to_socket_addrs(&addr)? {
            match TcpStream::connect_timeout(&candidate, connect_timeout) {
                Ok(stream) => {
                    return Ok(Connection {
                        socket: Box::new(stream),
                        host: host.to_string(),
                        port,
                        pending: Vec::with_capacity(INITIAL_LINE_CAPACITY),
                        last_read: None,
                        security_strength: 0,
                    });
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err
            .map(MailError::from)
            .unwrap_or_else(|| MailError::IoLost(format!("could not resolve {addr}"))))
    }

    /// Wrap an already-open connection as a test double over any
    /// `Transport`.
    pub fn from_transport(host: &str, port: u16, socket: Box<dyn Transport>) -> Connection {
        Connection {
            socket,
            host: host.to_string(),
            port,
            pending: Vec::with_capacity(INITIAL_LINE_CAPACITY),
            last_read: None,
            security_strength: 0,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn security_strength(&self) -> u32 {
        self.security_strength
    }

    pub fn is_encrypted(&self) -> bool {
        self.security_strength > 0
    }

    pub fn close(&mut self) {
        self.socket.shutdown();
    }

    /// Upgrade the current plaintext TCP connection to TLS in place
    /// (STLS/STARTTLS). Only valid on a real `TcpStream`-backed
    /// connection; test doubles provide their own pre-encrypted
    /// transport and should not call this.
    pub fn starttls(
        &mut self,
        raw: TcpStream,
        connector: &native_tls::TlsConnector,
    ) -> MailResult<()> {
        let domain = self.host.clone();
        let tls = connector.connect(&domain, raw).map_err(|e| {
            MailError::EncryptionUnavailable(format!("TLS handshake failed: {e}"))
        })?;
        self.socket = Box::new(tls);
        self.security_strength = 128;
        Ok(())
    }

    /// Discard any buffered or immediately-available input. Used
    /// before an in-band TLS upgrade to drop a server's pipelined
    /// response to a command issued just before STLS.
    pub fn empty(&mut self) -> MailResult<()> {
        self.pending.clear();
        self.socket.set_read_timeout(Some(Duration::from_millis(1)))?;
        let mut scratch = [0u8; 4096];
        loop {
            match self.socket.read(&mut scratch) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {
                    break
                }
                Err(e) => return Err(e.into()),
            }
        }
        self.socket.set_read_timeout(None)?;
        Ok(())
    }

    /// Block (up to `timeout`) until input is available.
    pub fn poll(&mut self, timeout: Duration) -> MailResult<PollOutcome> {
        if !self.pending.is_empty() {
            return Ok(PollOutcome::Ready);
        }
        self.socket.set_read_timeout(Some(timeout))?;
        let mut probe = [0u8; 1];
        let outcome = match self.socket.read(&mut probe) {
            Ok(0) => Err(MailError::IoLost("peer closed the connection".into())),
            Ok(_) => {
                self.pending.push(probe[0]);
                Ok(PollOutcome::Ready)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {
                Ok(PollOutcome::Timeout)
            }
            Err(e) => Err(e.into()),
        };
        self.socket.set_read_timeout(None)?;
        outcome
    }

    /// Read one logical line, stripping the terminating CR-LF (or
    /// bare LF). Grows the internal buffer as needed when a line
    /// exceeds the current capacity rather than truncating it.
    pub fn readln(&mut self) -> MailResult<String> {
        self.readln_d(LogLevel::Debug)
    }

    pub fn readln_d(&mut self, level: LogLevel) -> MailResult<String> {
        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
                line.pop(); // '\n'
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                let line = String::from_utf8_lossy(&line).into_owned();
                log_wire(level, "<", &line);
                self.last_read = Some(Instant::now());
                return Ok(line);
            }
            let mut chunk = [0u8; 4096];
            let n = self.socket.read(&mut chunk)?;
            if n == 0 {
                return Err(MailError::IoLost("peer closed the connection".into()));
            }
            self.pending.extend_from_slice(&chunk[..n]);
        }
    }

    /// Read exactly `n` bytes verbatim, bypassing line framing. Used
    /// for IMAP literal syntax (`{n}`), whose body may itself contain
    /// CR/LF and so cannot be read line-by-line.
    pub fn read_exact_bytes(&mut self, n: usize) -> MailResult<Vec<u8>> {
        let mut out = Vec::with_capacity(n);
        let take = n.min(self.pending.len());
        out.extend(self.pending.drain(..take));
        while out.len() < n {
            let mut chunk = [0u8; 4096];
            let want = (n - out.len()).min(chunk.len());
            let read = self.socket.read(&mut chunk[..want])?;
            if read == 0 {
                return Err(MailError::IoLost("peer closed the connection".into()));
            }
            out.extend_from_slice(&chunk[..read]);
        }
        self.last_read = Some(Instant::now());
        Ok(out)
    }

    pub fn write(&mut self, buf: &[u8]) -> MailResult<()> {
        self.write_d(buf, LogLevel::Debug)
    }

    pub fn write_d(&mut self, buf: &[u8], level: LogLevel) -> MailResult<()> {
        log_wire(level, ">", String::from_utf8_lossy(buf).trim_end());
        self.socket.write_all(buf).map_err(MailError::from)
    }

    pub fn last_read(&self) -> Option<Instant> {
        self.last_read
    }
}

fn log_wire(level: LogLevel, dir: &str, line: &str) {
    match level {
        LogLevel::Trace => tracing::trace!(target: "mail_core::wire", "{dir} {line}"),
        LogLevel::Debug => tracing::debug!(target: "mail_core::wire", "{dir} {line}"),
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod test_support {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// An in-memory duplex transport for protocol tests: writes from
    /// the code under test land in `to_server`; `from_server` is
    /// fed by the test to simulate server responses.
    #[derive(Clone, Default)]
    pub struct MemoryTransport {
        pub from_server: Arc<Mutex<VecDeque<u8>>>,
        pub to_server: Arc<Mutex<Vec<u8>>>,
    }

    impl MemoryTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_server_line(&self, line: &str) {
            let mut buf = self.from_server.lock().unwrap();
            buf.extend(line.as_bytes());
            buf.extend(b"\r\n");
        }

        pub fn written(&self) -> Vec<u8> {
            self.to_server.lock().unwrap().clone()
        }
    }

    impl Transport for MemoryTransport {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut src = self.from_server.lock().unwrap();
            if src.is_empty() {
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "no data"));
            }
            let n = buf.len().min(src.len());
            for slot in buf.iter_mut().take(n) {
                *slot = src.pop_front().unwrap();
            }
            Ok(n)
        }

        fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
            self.to_server.lock().unwrap().extend_from_slice(buf);
            Ok(())
        }

        fn set_read_timeout(&mut self, _timeout: Option<Duration>) -> io::Result<()> {
            Ok(())
        }

        fn shutdown(&mut self) {}
    }

    pub fn connection_with(transport: MemoryTransport) -> Connection {
        Connection::from_transport("test-host", 0, Box::new(transport))
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn readln_strips_crlf_and_reassembles_split_reads() {
        let transport = MemoryTransport::new();
        transport.push_server_line("+OK POP3 ready");
        let mut conn = connection_with(transport);
        let line = conn.readln().unwrap();
        assert_eq!(line, "+OK POP3 ready");
    }

    #[test]
    fn write_is_observed_verbatim_by_the_test_double() {
        let transport = MemoryTransport::new();
        let mut conn = connection_with(transport.clone());
        conn.write(b"USER alice\r\n").unwrap();
        assert_eq!(transport.written(), b"USER alice\r\n");
    }

    #[test]
    fn readln_errors_when_peer_closes_without_a_final_newline() {
        let transport = MemoryTransport::new();
        let mut conn = connection_with(transport);
        let err = conn.readln();
        assert!(matches!(err, Err(MailError::IoLost(_))));
    }
}
