#![forbid(unsafe_code)]
#![warn(clippy::all)]

//! Sans-IO TLS 1.2 and DTLS 1.2 protocol engine.
//!
//! The crate implements the handshake and record layer as a pure state
//! machine. It never touches a socket: the caller feeds incoming bytes
//! with `handle_packet`, drives time with `handle_timeout` and drains
//! work with `poll_output`. The same [`Client`] and [`Server`] run over
//! byte streams and datagrams, selected by [`WireFormat`].
//!
//! ```no_run
//! use std::time::Instant;
//! use timpl::{Client, Config, Output, WireFormat};
//!
//! let config = Config::builder().build().unwrap();
//! let mut client = Client::new(config.into(), WireFormat::Datagram);
//! client.handle_timeout(Instant::now()).unwrap();
//!
//! let mut buf = vec![0; 2048];
//! loop {
//!     match client.poll_output(&mut buf, Instant::now()) {
//!         Output::Packet(p) => { /* send p to the peer */ }
//!         Output::Timeout(at) => break, // wait until `at`, then handle_timeout
//!         _ => {}
//!     }
//! }
//! ```

mod buffer;
mod client;
mod config;
mod crypto;
mod engine;
mod error;
mod event;
mod incoming;
mod message;
mod queue;
mod rng;
mod server;
mod session;
mod timer;
mod transcript;
pub mod transport;
mod types;
mod util;
mod window;

use std::time::Instant;

pub use client::Client;
pub use config::{Config, ConfigBuilder};
pub use crypto::{calculate_fingerprint, CertVerifier, Credential, FingerprintVerifier, SigningKey};
pub use error::Error;
pub use message::{Alert, AlertDescription, AlertLevel, CipherSuite, SessionId};
pub use rng::SeededRng;
pub use server::Server;
pub use session::{SessionCache, SessionParameters};
pub use types::{HeartbeatMode, MaxFragmentLength, WireFormat};

/// Output of polling an endpoint.
///
/// Borrowed variants reference the buffer passed to `poll_output` and are
/// valid until the next call.
#[derive(Debug, PartialEq, Eq)]
pub enum Output<'a> {
    /// A packet to transmit to the peer.
    ///
    /// For [`WireFormat::Datagram`] each value is one datagram. For
    /// [`WireFormat::Stream`] the bytes are written to the stream as-is.
    Packet(&'a [u8]),

    /// Decrypted application data received from the peer.
    ApplicationData(&'a [u8]),

    /// The peer's leaf certificate in DER form.
    ///
    /// Emitted once, before [`Output::Connected`].
    PeerCert(&'a [u8]),

    /// One supplemental data entry received during the handshake
    /// (RFC 4680). The `u16` is the entry's data type.
    SupplementalData(u16, &'a [u8]),

    /// The handshake completed. Application data can flow.
    Connected,

    /// The peer sent close_notify. No more application data will arrive.
    PeerClosed,

    /// Nothing to do until this time.
    ///
    /// The caller must invoke `handle_timeout` no later than this. A new
    /// timeout is emitted every poll; later values replace earlier ones.
    Timeout(Instant),
}
