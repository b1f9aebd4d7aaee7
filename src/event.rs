//! Local events queued by the engine for delivery via `poll_output`.

use crate::buffer::Buf;
use crate::Output;

/// Events the protocol engine raises for the application.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum LocalEvent {
    /// Peer certificate is available for inspection.
    PeerCert,
    /// A supplemental data entry arrived from the peer.
    SupplementalData(u16, Buf),
    /// Handshake completed successfully.
    Connected,
}

impl LocalEvent {
    /// Convert this event into an `Output` for delivery to the application.
    ///
    /// * `buf` - Buffer to copy certificate or supplemental data into.
    /// * `peer_certs` - Peer certificates received during handshake.
    pub(crate) fn into_output<'a>(self, buf: &'a mut [u8], peer_certs: &[Buf]) -> Output<'a> {
        match self {
            LocalEvent::PeerCert => {
                // The event is only queued after the certificate is stored.
                let cert = peer_certs.first().expect("PeerCert event without certificate");
                let l = cert.len();
                assert!(l <= buf.len(), "Buffer too small for peer certificate");
                buf[..l].copy_from_slice(cert);
                Output::PeerCert(&buf[..l])
            }
            LocalEvent::SupplementalData(data_type, data) => {
                let l = data.len();
                assert!(l <= buf.len(), "Buffer too small for supplemental data");
                buf[..l].copy_from_slice(&data);
                Output::SupplementalData(data_type, &buf[..l])
            }
            LocalEvent::Connected => Output::Connected,
        }
    }
}
