//! Transport seams and blocking drivers.
//!
//! The protocol endpoints ([`Client`], [`Server`]) are sans-IO; this
//! module is the only place that blocks. [`DatagramTransport`] abstracts
//! an unreliable packet transport (UDP-like), [`StreamTransport`] a
//! reliable byte stream. The drivers pump an endpoint over a transport
//! and surface decrypted events to the caller.

use std::io;
use std::time::{Duration, Instant};

use thiserror::Error as ThisError;

use crate::{Client, Error, Output, Server};

/// An unreliable datagram transport.
pub trait DatagramTransport {
    /// Wait up to `timeout` for one datagram. `None` means the timeout
    /// elapsed without traffic.
    fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>>;

    /// Send one datagram.
    fn send(&mut self, data: &[u8]) -> io::Result<()>;

    /// Largest datagram `send` accepts.
    fn send_limit(&self) -> usize;

    /// Largest datagram `receive` can produce.
    fn receive_limit(&self) -> usize;

    /// Release the underlying resource. Further sends may fail.
    fn close(&mut self);
}

/// A reliable ordered byte stream. Blanket-implemented for anything
/// readable and writable, e.g. `TcpStream`.
pub trait StreamTransport: io::Read + io::Write {}

impl<T: io::Read + io::Write> StreamTransport for T {}

/// What a driver surfaces to the caller.
///
/// The borrowed [`Output`] variants are copied out so the caller can hold
/// events across driver steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Decrypted application data from the peer.
    ApplicationData(Vec<u8>),
    /// The peer's leaf certificate in DER form.
    PeerCert(Vec<u8>),
    /// One supplemental data entry received during the handshake.
    SupplementalData(u16, Vec<u8>),
    /// The handshake completed.
    Connected,
    /// The peer sent close_notify.
    PeerClosed,
}

/// Driver failures: either the protocol gave up or the transport did.
#[derive(Debug, ThisError)]
pub enum DriverError {
    #[error("protocol: {0}")]
    Protocol(#[from] Error),

    #[error("transport: {0}")]
    Io(#[from] io::Error),
}

/// Things an endpoint must expose for a driver to pump it.
///
/// Implemented by [`Client`] and [`Server`]; the methods mirror their
/// inherent ones.
pub trait Endpoint {
    fn handle_packet(&mut self, packet: &[u8]) -> Result<(), Error>;
    fn handle_timeout(&mut self, now: Instant) -> Result<(), Error>;
    fn poll_output<'a>(&mut self, buf: &'a mut [u8], now: Instant) -> Output<'a>;
    fn send_application_data(&mut self, data: &[u8]) -> Result<(), Error>;
    fn close(&mut self);
}

impl Endpoint for Client {
    fn handle_packet(&mut self, packet: &[u8]) -> Result<(), Error> {
        Client::handle_packet(self, packet)
    }
    fn handle_timeout(&mut self, now: Instant) -> Result<(), Error> {
        Client::handle_timeout(self, now)
    }
    fn poll_output<'a>(&mut self, buf: &'a mut [u8], now: Instant) -> Output<'a> {
        Client::poll_output(self, buf, now)
    }
    fn send_application_data(&mut self, data: &[u8]) -> Result<(), Error> {
        Client::send_application_data(self, data)
    }
    fn close(&mut self) {
        Client::close(self)
    }
}

impl Endpoint for Server {
    fn handle_packet(&mut self, packet: &[u8]) -> Result<(), Error> {
        Server::handle_packet(self, packet)
    }
    fn handle_timeout(&mut self, now: Instant) -> Result<(), Error> {
        Server::handle_timeout(self, now)
    }
    fn poll_output<'a>(&mut self, buf: &'a mut [u8], now: Instant) -> Output<'a> {
        Server::poll_output(self, buf, now)
    }
    fn send_application_data(&mut self, data: &[u8]) -> Result<(), Error> {
        Server::send_application_data(self, data)
    }
    fn close(&mut self) {
        Server::close(self)
    }
}

/// Upper bound on a single poll_output buffer: one record of maximum
/// plaintext plus headers and AEAD expansion.
const POLL_BUF_LEN: usize = (1 << 14) + 2048 + 13;

/// Blocking driver over a [`DatagramTransport`].
pub struct DatagramDriver<T, E> {
    transport: T,
    endpoint: E,
    poll_buf: Vec<u8>,
    recv_buf: Vec<u8>,
}

impl<T: DatagramTransport, E: Endpoint> DatagramDriver<T, E> {
    pub fn new(transport: T, endpoint: E) -> Self {
        let recv_limit = transport.receive_limit();
        DatagramDriver {
            transport,
            endpoint,
            poll_buf: vec![0; POLL_BUF_LEN],
            recv_buf: vec![0; recv_limit],
        }
    }

    pub fn endpoint(&mut self) -> &mut E {
        &mut self.endpoint
    }

    /// Block until the handshake completes.
    pub fn connect(&mut self) -> Result<(), DriverError> {
        loop {
            if self.next_event()? == Event::Connected {
                return Ok(());
            }
        }
    }

    /// Queue application data and flush it to the transport.
    pub fn send(&mut self, data: &[u8]) -> Result<(), DriverError> {
        self.endpoint.send_application_data(data)?;
        self.flush()?;
        Ok(())
    }

    /// Send close_notify and release the transport.
    pub fn close(&mut self) -> Result<(), DriverError> {
        self.endpoint.close();
        self.flush()?;
        self.transport.close();
        Ok(())
    }

    /// Block until the next event, sending and receiving as needed.
    pub fn next_event(&mut self) -> Result<Event, DriverError> {
        loop {
            let now = Instant::now();
            match self.endpoint.poll_output(&mut self.poll_buf, now) {
                Output::Packet(p) => self.transport.send(p)?,
                Output::ApplicationData(d) => return Ok(Event::ApplicationData(d.to_vec())),
                Output::PeerCert(c) => return Ok(Event::PeerCert(c.to_vec())),
                Output::SupplementalData(t, d) => {
                    return Ok(Event::SupplementalData(t, d.to_vec()))
                }
                Output::Connected => return Ok(Event::Connected),
                Output::PeerClosed => return Ok(Event::PeerClosed),
                Output::Timeout(at) => {
                    let Some(wait) = at.checked_duration_since(now) else {
                        self.endpoint.handle_timeout(now)?;
                        continue;
                    };
                    match self.transport.receive(&mut self.recv_buf, wait)? {
                        Some(n) => {
                            let packet = &self.recv_buf[..n];
                            self.endpoint.handle_packet(packet)?;
                        }
                        None => self.endpoint.handle_timeout(Instant::now())?,
                    }
                }
            }
        }
    }

    /// Push queued packets to the transport without blocking on receive.
    fn flush(&mut self) -> Result<(), DriverError> {
        loop {
            let now = Instant::now();
            match self.endpoint.poll_output(&mut self.poll_buf, now) {
                Output::Packet(p) => self.transport.send(p)?,
                _ => return Ok(()),
            }
        }
    }
}

/// Blocking driver over a [`StreamTransport`].
///
/// Stream reads have no timeout; DTLS-style retransmission timers are
/// disabled on streams, so blocking on the peer is the correct behavior.
pub struct StreamDriver<T, E> {
    transport: T,
    endpoint: E,
    poll_buf: Vec<u8>,
    recv_buf: Vec<u8>,
}

impl<T: StreamTransport, E: Endpoint> StreamDriver<T, E> {
    pub fn new(transport: T, endpoint: E) -> Self {
        StreamDriver {
            transport,
            endpoint,
            poll_buf: vec![0; POLL_BUF_LEN],
            recv_buf: vec![0; 4096],
        }
    }

    pub fn endpoint(&mut self) -> &mut E {
        &mut self.endpoint
    }

    /// Block until the handshake completes.
    pub fn connect(&mut self) -> Result<(), DriverError> {
        loop {
            if self.next_event()? == Event::Connected {
                return Ok(());
            }
        }
    }

    /// Queue application data and flush it to the transport.
    pub fn send(&mut self, data: &[u8]) -> Result<(), DriverError> {
        self.endpoint.send_application_data(data)?;
        self.flush()?;
        Ok(())
    }

    /// Send close_notify and flush.
    pub fn close(&mut self) -> Result<(), DriverError> {
        self.endpoint.close();
        self.flush()?;
        Ok(())
    }

    /// Block until the next event, sending and receiving as needed.
    pub fn next_event(&mut self) -> Result<Event, DriverError> {
        loop {
            let now = Instant::now();
            match self.endpoint.poll_output(&mut self.poll_buf, now) {
                Output::Packet(p) => {
                    self.transport.write_all(p)?;
                    self.transport.flush()?;
                }
                Output::ApplicationData(d) => return Ok(Event::ApplicationData(d.to_vec())),
                Output::PeerCert(c) => return Ok(Event::PeerCert(c.to_vec())),
                Output::SupplementalData(t, d) => {
                    return Ok(Event::SupplementalData(t, d.to_vec()))
                }
                Output::Connected => return Ok(Event::Connected),
                Output::PeerClosed => return Ok(Event::PeerClosed),
                Output::Timeout(_) => {
                    let n = self.transport.read(&mut self.recv_buf)?;
                    if n == 0 {
                        return Err(DriverError::Io(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "stream closed by peer",
                        )));
                    }
                    let chunk = &self.recv_buf[..n];
                    self.endpoint.handle_packet(chunk)?;
                }
            }
        }
    }

    fn flush(&mut self) -> Result<(), DriverError> {
        loop {
            let now = Instant::now();
            match self.endpoint.poll_output(&mut self.poll_buf, now) {
                Output::Packet(p) => {
                    self.transport.write_all(p)?;
                    self.transport.flush()?;
                }
                _ => return Ok(()),
            }
        }
    }
}
