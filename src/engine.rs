use std::collections::VecDeque;
use std::mem;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use crate::buffer::{Buf, BufferPool, TmpBuf};
use crate::crypto::{create_record_ciphers, verify_data, CipherPair, SecurityParameters};
use crate::crypto::{Aad, Iv, Nonce, AEAD_OVERHEAD, EXPLICIT_NONCE_LEN};
use crate::event::LocalEvent;
use crate::incoming::{Incoming, Record, RecordDecrypt};
use crate::message::Record as WireRecord;
use crate::message::{
    Alert, AlertDescription, Body, CipherSuite, Handshake, Header, Heartbeat,
    HeartbeatMessageType, MessageType,
};
use crate::queue::{QueueRx, QueueTx};
use crate::timer::ExponentialBackoff;
use crate::transcript::Transcript;
use crate::types::{ContentType, HeartbeatMode, Sequence, WireFormat};
use crate::window::ReplayWindow;
use crate::{Config, Error, Output, SeededRng};

const MAX_DEFRAGMENT_PACKETS: usize = 50;

/// Largest plaintext fragment we put in a single record (RFC 5246 §6.2.1).
const MAX_PLAINTEXT_LEN: usize = 1 << 14;

/// Largest ciphertext fragment we accept from the peer (RFC 5246 §6.2.3).
const MAX_CIPHERTEXT_LEN: usize = MAX_PLAINTEXT_LEN + 2048;

pub struct Engine {
    config: Arc<Config>,

    /// Whether records are framed for a byte stream or for datagrams.
    wire: WireFormat,

    /// Seedable random number generator for deterministic testing
    pub(crate) rng: SeededRng,

    /// Pool of buffers
    buffers_free: BufferPool,

    /// Counters for sending records during epoch 0.
    ///
    /// This is kept separate since resends might force us to
    /// "go back" to these sequence number even if we technically
    /// progressed to epoch 1.
    sequence_epoch_0: Sequence,

    /// Counters for epoch 1 and beyond.
    sequence_epoch_n: Sequence,

    /// Queue of incoming packets.
    queue_rx: QueueRx,

    /// Queue of outgoing packets.
    queue_tx: QueueTx,

    /// Negotiated security parameters (suite, randoms, master secret).
    security: SecurityParameters,

    /// Record ciphers for both directions. Derived from the key block
    /// once the master secret is in place.
    ciphers: Option<CipherPair>,

    /// Whether the remote peer has enabled encryption
    peer_encryption_enabled: bool,

    /// The epoch we currently send under. Bumped when our own
    /// ChangeCipherSpec goes out.
    tx_epoch: u16,

    /// Whether this engine is for a client (true) or server (false)
    is_client: bool,

    /// Expected peer handshake sequence number
    peer_handshake_seq_no: u16,

    /// Next handshake message sequence number for sending
    next_handshake_seq_no: u16,

    /// Handshakes collected for hash computation.
    transcript: Transcript,

    /// Anti-replay window state. Datagram mode only.
    replay: ReplayWindow,

    /// Epoch the replay window currently tracks.
    replay_epoch: u16,

    /// The records that have been sent in the current flight.
    flight_saved_records: Vec<Entry>,

    /// Flight backoff
    flight_backoff: ExponentialBackoff,

    /// Timeout for the current flight. Always disabled in stream mode,
    /// where the transport retransmits.
    flight_timeout: Timeout,

    /// Global timeout for the entire connect operation.
    connect_timeout: Timeout,

    /// Whether we are ready to release application data from poll_output.
    release_app_data: bool,

    /// Unframed incoming bytes in stream mode.
    stream_rx: Buf,

    /// Stop framing stream bytes until the pending cipher change is
    /// applied via enable_peer_encryption().
    stream_hold: bool,

    /// Implicit record sequence for the stream receive direction.
    stream_rx_sequence: Sequence,

    /// Handshake fragments cut out of stream records, awaiting a
    /// complete message.
    stream_hs_rx: Buf,

    /// Message sequence assigned to handshakes reassembled from the
    /// stream, which carry none on the wire.
    stream_hs_seq: u16,

    /// Negotiated plaintext fragment limit.
    max_fragment: usize,

    /// Peer's heartbeat mode from the extension exchange.
    heartbeat_peer: Option<HeartbeatMode>,

    /// Events pending delivery through poll_output.
    local_events: VecDeque<LocalEvent>,

    /// Certificates presented by the peer.
    peer_certs: Vec<Buf>,

    /// Peer sent close_notify.
    peer_closed: bool,

    /// PeerClosed already surfaced through poll_output.
    peer_closed_delivered: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Timeout {
    Disabled,
    Unarmed,
    Armed(Instant),
}

#[derive(Debug)]
struct Entry {
    content_type: ContentType,
    epoch: u16,
    fragment: Buf,
}

impl Engine {
    pub fn new(config: Arc<Config>, wire: WireFormat, is_client: bool) -> Self {
        let mut rng = SeededRng::new(config.rng_seed());

        let flight_backoff =
            ExponentialBackoff::new(config.flight_start_rto(), config.flight_retries(), &mut rng);

        // In stream mode the transport is reliable, so there is no
        // flight resend timer.
        let flight_timeout = match wire {
            WireFormat::Datagram => Timeout::Unarmed,
            WireFormat::Stream => Timeout::Disabled,
        };

        Self {
            config,
            wire,
            rng,
            buffers_free: BufferPool::default(),
            sequence_epoch_0: Sequence::new(0),
            sequence_epoch_n: Sequence::new(1),
            queue_rx: QueueRx::new(),
            queue_tx: QueueTx::new(),
            security: SecurityParameters::new(),
            ciphers: None,
            peer_encryption_enabled: false,
            tx_epoch: 0,
            is_client,
            peer_handshake_seq_no: 0,
            next_handshake_seq_no: 0,
            transcript: Transcript::new(),
            replay: ReplayWindow::new(),
            replay_epoch: 0,
            flight_saved_records: Vec::new(),
            flight_backoff,
            flight_timeout,
            connect_timeout: Timeout::Unarmed,
            release_app_data: false,
            stream_rx: Buf::new(),
            stream_hold: false,
            stream_rx_sequence: Sequence::new(0),
            stream_hs_rx: Buf::new(),
            stream_hs_seq: 0,
            max_fragment: MAX_PLAINTEXT_LEN,
            heartbeat_peer: None,
            local_events: VecDeque::new(),
            peer_certs: Vec::with_capacity(3),
            peer_closed: false,
            peer_closed_delivered: false,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn wire(&self) -> WireFormat {
        self.wire
    }

    pub fn is_client(&self) -> bool {
        self.is_client
    }

    pub fn cipher_suite(&self) -> Option<CipherSuite> {
        self.security.cipher_suite()
    }

    /// Is the given cipher suite allowed by configuration
    pub fn is_cipher_suite_allowed(&self, suite: CipherSuite) -> bool {
        self.config.cipher_suites().contains(&suite)
    }

    pub fn security(&self) -> &SecurityParameters {
        &self.security
    }

    pub fn security_mut(&mut self) -> &mut SecurityParameters {
        &mut self.security
    }

    pub fn parse_packet(&mut self, packet: &[u8]) -> Result<(), Error> {
        match self.wire {
            WireFormat::Datagram => {
                let cs = self.security.cipher_suite();
                let incoming = Incoming::parse_datagram(packet, self, cs)?;
                if let Some(incoming) = incoming {
                    self.insert_incoming(incoming)?;
                }
                Ok(())
            }
            WireFormat::Stream => {
                self.stream_rx.extend_from_slice(packet);
                self.drive_stream_rx()
            }
        }
    }

    /// Cut complete records out of the buffered stream bytes.
    ///
    /// Framing stops at a ChangeCipherSpec record. Everything behind it
    /// is under the new cipher and stays buffered until the state
    /// machine calls enable_peer_encryption().
    fn drive_stream_rx(&mut self) -> Result<(), Error> {
        let header_len = self.wire.header_len();

        while !self.stream_hold {
            if self.stream_rx.len() < header_len {
                break;
            }

            let length_offset = header_len - 2;
            let length = u16::from_be_bytes([
                self.stream_rx[length_offset],
                self.stream_rx[length_offset + 1],
            ]) as usize;

            if length > MAX_CIPHERTEXT_LEN {
                return Err(Error::SecurityError(format!(
                    "Record overflow: {} bytes",
                    length
                )));
            }

            let total = header_len + length;
            if self.stream_rx.len() < total {
                break;
            }

            // Copy the record out so the parse can borrow self.
            let mut record_buf = self.buffers_free.pop();
            record_buf.extend_from_slice(&self.stream_rx[..total]);
            self.stream_rx.drain_front(total);

            let sequence = self.stream_rx_sequence;
            let cs = self.security.cipher_suite();
            let record = Record::parse_stream(&record_buf, sequence, self, cs)?;
            self.buffers_free.push(record_buf);

            self.stream_rx_sequence.sequence_number += 1;

            match record.record().content_type {
                ContentType::Handshake => {
                    // Handshake messages can span records and share
                    // records. Collect the raw fragment and cut out
                    // complete messages below.
                    let fragment = record.record().fragment(record.buffer());
                    self.stream_hs_rx.extend_from_slice(fragment);
                    self.buffers_free.push(record.into_buffer());
                    self.drive_stream_handshakes()?;
                }
                ContentType::ChangeCipherSpec => {
                    self.stream_hold = true;
                    self.insert_incoming(Incoming::single(record))?;
                }
                _ => {
                    self.insert_incoming(Incoming::single(record))?;
                }
            }
        }

        Ok(())
    }

    /// Cut complete handshake messages out of the reassembly buffer and
    /// queue them, assigning message sequence numbers in arrival order.
    fn drive_stream_handshakes(&mut self) -> Result<(), Error> {
        loop {
            if self.stream_hs_rx.len() < 4 {
                break;
            }

            let body_len = ((self.stream_hs_rx[1] as usize) << 16)
                | ((self.stream_hs_rx[2] as usize) << 8)
                | (self.stream_hs_rx[3] as usize);
            let total = 4 + body_len;

            if self.stream_hs_rx.len() < total {
                break;
            }

            let mut buffer = self.buffers_free.pop();
            buffer.extend_from_slice(&self.stream_hs_rx[..total]);
            self.stream_hs_rx.drain_front(total);

            let cs = self.security.cipher_suite();
            let record = Record::reassembled_handshake(buffer, self.stream_hs_seq, cs)?;
            self.stream_hs_seq += 1;

            self.insert_incoming(Incoming::single(record))?;
        }

        Ok(())
    }

    /// Insert the Incoming using the logic:
    ///
    /// 1. If it is a handshake, sort by the message_seq
    /// 2. If it is not a handshake, sort by sequence_number
    ///
    fn insert_incoming(&mut self, incoming: Incoming) -> Result<(), Error> {
        // Capacity guard
        if self.queue_rx.len() >= self.config.max_queue_rx() {
            warn!(
                "Receive queue full (max {}): {:?}",
                self.config.max_queue_rx(),
                self.queue_rx
            );
            return Err(Error::ReceiveQueueFull);
        }

        // Dispatch to specialized handlers
        if incoming.first().first_handshake().is_some() {
            self.insert_incoming_handshake(incoming)
        } else {
            self.insert_incoming_non_handshake(incoming)
        }
    }

    fn insert_incoming_handshake(&mut self, incoming: Incoming) -> Result<(), Error> {
        let first_record = incoming.first();
        let handshake = first_record
            .first_handshake()
            .expect("caller ensures handshake");

        let key_current = (
            handshake.header.message_seq,
            handshake.header.fragment_offset,
        );

        let maybe_dupe_seq = incoming
            .records()
            .iter()
            .filter_map(|r| r.first_handshake())
            .filter_map(|h| h.dupe_triggers_resend())
            .next();

        // Some MessageType when resent, means we must trigger
        // an immediate resend of the entire flight.
        if let Some(dupe_seq) = maybe_dupe_seq {
            if dupe_seq < self.peer_handshake_seq_no {
                self.flight_resend("dupe triggers resend")?;
            }
        }

        // Drop old duplicates we've already processed - don't let them block newer messages.
        if handshake.header.message_seq < self.peer_handshake_seq_no {
            return Ok(());
        }

        // Reject new handshakes after initial handshake is complete (renegotiation not supported).
        if self.release_app_data && handshake.header.message_seq >= self.peer_handshake_seq_no {
            return Err(Error::RenegotiationAttempt);
        }

        let search_result = self.queue_rx.binary_search_by(|item| {
            let key_other = item
                .first()
                .first_handshake()
                .as_ref()
                .map(|h| (h.header.message_seq, h.header.fragment_offset))
                .unwrap_or((u16::MAX, u32::MAX));
            key_other.cmp(&key_current)
        });

        match search_result {
            Err(index) => {
                // Insert in order of handshake key
                self.queue_rx.insert(index, incoming);
            }
            Ok(_) => {
                // Exact duplicate handshake fragment
            }
        }

        Ok(())
    }

    fn insert_incoming_non_handshake(&mut self, incoming: Incoming) -> Result<(), Error> {
        let first = incoming.first();
        let seq_current = first.record().sequence;

        let search_result = self
            .queue_rx
            .binary_search_by_key(&seq_current, |item| item.first().record().sequence);

        match search_result {
            Err(index) => self.queue_rx.insert(index, incoming),
            Ok(_) => {
                // For epoch 0, we can get duplicates due to resends.
                // For epoch 1, we have the replay window and there should
                // be no duplicates.
                assert!(seq_current.epoch == 0);
            }
        }

        Ok(())
    }

    pub fn handle_timeout(&mut self, now: Instant) -> Result<(), Error> {
        if self.connect_timeout == Timeout::Unarmed {
            debug!(
                "Connect timeout in: {:.03}s",
                self.config.handshake_timeout().as_secs_f32()
            );
            let timeout = now + self.config.handshake_timeout();
            self.connect_timeout = Timeout::Armed(timeout);
        }
        if self.flight_timeout == Timeout::Unarmed {
            debug!(
                "Flight timeout in: {:.03}s",
                self.flight_backoff.rto().as_secs_f32()
            );
            let timeout = now + self.flight_backoff.rto();
            self.flight_timeout = Timeout::Armed(timeout);
        }

        // The connect timeout is the overall timeout for establishing the connection
        if let Timeout::Armed(connect_timeout) = self.connect_timeout {
            if now >= connect_timeout {
                return Err(Error::Timeout("connect"));
            }
        }

        // If there is no flight timeout, we have already checked the global connect timeout.
        let Timeout::Armed(flight_timeout) = self.flight_timeout else {
            return Ok(());
        };

        if now >= flight_timeout {
            if self.flight_backoff.can_retry() {
                self.flight_backoff.attempt(&mut self.rng);
                debug!(
                    "Re-arm flight timeout due to resend in {}",
                    self.flight_backoff.rto().as_secs_f32()
                );
                let timeout = now + self.flight_backoff.rto();
                self.flight_timeout = Timeout::Armed(timeout);
                self.flight_resend("flight timeout")?;
            } else {
                return Err(Error::Timeout("handshake"));
            }
        }

        Ok(())
    }

    pub fn poll_output<'a>(&mut self, buf: &'a mut [u8], now: Instant) -> Output<'a> {
        // Drain incoming queue of processed records.
        self.purge_handled_queue_rx();

        // Events (PeerCert, Connected, SupplementalData) precede any
        // application data in protocol order.
        if let Some(event) = self.local_events.pop_front() {
            return event.into_output(buf, &self.peer_certs);
        }

        // Check if we have any decrypted app data.
        let buf = match self.poll_app_data(buf) {
            Ok(p) => return Output::ApplicationData(p),
            Err(b) => b,
        };

        // Surface the peer close once all preceding data is drained.
        if self.peer_closed && !self.peer_closed_delivered {
            self.peer_closed_delivered = true;
            return Output::PeerClosed;
        }

        if let Ok(p) = self.poll_packet_tx(buf) {
            return Output::Packet(p);
        }

        let next_timeout = self.poll_timeout(now);

        Output::Timeout(next_timeout)
    }

    fn poll_app_data<'a>(&mut self, buf: &'a mut [u8]) -> Result<&'a [u8], &'a mut [u8]> {
        if !self.release_app_data {
            return Err(buf);
        }

        let mut unhandled = self
            .queue_rx
            .iter()
            .flat_map(|i| i.records().iter())
            .filter(|r| r.record().content_type == ContentType::ApplicationData)
            .skip_while(|r| r.is_handled());

        let Some(next) = unhandled.next() else {
            return Err(buf);
        };

        let record_buffer = next.buffer();
        let fragment = next.record().fragment(record_buffer);
        let len = fragment.len();

        assert!(
            len <= buf.len(),
            "Output buffer too small for application data {} > {}",
            len,
            buf.len()
        );

        buf[..len].copy_from_slice(fragment);
        next.set_handled();

        Ok(&buf[..len])
    }

    fn purge_handled_queue_rx(&mut self) {
        while let Some(peek) = self.queue_rx.front() {
            let fully_handled = peek.records().iter().all(|r| r.is_handled());

            if fully_handled {
                let incoming = self.queue_rx.pop_front().unwrap();
                incoming
                    .into_records()
                    .for_each(|r| self.buffers_free.push(r.into_buffer()));
            } else {
                break;
            }
        }
    }

    fn poll_packet_tx<'a>(&mut self, buf: &'a mut [u8]) -> Result<&'a [u8], &'a mut [u8]> {
        let Some(p) = self.queue_tx.pop_front() else {
            return Err(buf);
        };

        assert!(
            p.len() <= buf.len(),
            "Output buffer too small for packet {} > {}",
            p.len(),
            buf.len()
        );

        let len = p.len();
        buf[..len].copy_from_slice(&p);

        Ok(&buf[..len])
    }

    fn poll_timeout(&self, now: Instant) -> Instant {
        // No timeouts, return a distant future
        if self.connect_timeout == Timeout::Disabled && self.flight_timeout == Timeout::Disabled {
            const DISTANT_FUTURE: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);
            return now + DISTANT_FUTURE;
        }

        match (self.connect_timeout, self.flight_timeout) {
            (Timeout::Armed(c), Timeout::Armed(f)) => {
                if c < f {
                    c
                } else {
                    f
                }
            }
            (Timeout::Armed(c), _) => c,
            (_, Timeout::Armed(f)) => f,
            _ => unreachable!(),
        }
    }

    pub fn flight_begin(&mut self, flight_no: u8) {
        debug!("Begin flight {}", flight_no);
        self.flight_backoff.reset(&mut self.rng);
        self.flight_clear_resends();
        if self.wire == WireFormat::Datagram {
            self.flight_timeout = Timeout::Unarmed;
        }
    }

    pub fn flight_stop_resend_timers(&mut self) {
        debug!("Stop connect and flight timeouts");
        self.flight_timeout = Timeout::Disabled;
        self.connect_timeout = Timeout::Disabled;
    }

    fn flight_clear_resends(&mut self) {
        for entry in self.flight_saved_records.drain(..) {
            self.buffers_free.push(entry.fragment);
        }
    }

    fn flight_resend(&mut self, reason: &str) -> Result<(), Error> {
        if self.flight_saved_records.is_empty() {
            return Ok(());
        }

        debug!("Resending flight due to {}", reason);
        // For lifetime issues, we take the entries out of self
        let records = mem::take(&mut self.flight_saved_records);

        for entry in &records {
            self.create_record(entry.content_type, entry.epoch, false, |fragment| {
                fragment.extend_from_slice(&entry.fragment);
            })?;
        }

        // Put the entries back into self
        self.flight_saved_records = records;

        Ok(())
    }

    pub fn has_complete_handshake(&mut self, wanted: MessageType) -> bool {
        self.has_complete_handshake_with_seq(wanted, self.peer_handshake_seq_no)
    }

    fn has_complete_handshake_with_seq(&mut self, wanted: MessageType, expected_seq: u16) -> bool {
        let mut skip_handled = self
            .queue_rx
            .iter()
            .flat_map(|i| i.records().iter())
            .skip_while(|r| r.is_handled())
            // Cap to MAX_DEFRAGMENT_PACKETS to avoid misbehaving peers
            .take(MAX_DEFRAGMENT_PACKETS)
            .flat_map(|r| r.handshakes().iter())
            .skip_while(|h| h.is_handled())
            .peekable();

        let maybe_first_handshake = skip_handled.peek();

        let Some(first) = maybe_first_handshake else {
            return false;
        };

        if first.header.message_seq != expected_seq {
            return false;
        }

        if first.header.msg_type != wanted {
            return false;
        }

        let wanted_seq = first.header.message_seq;
        let wanted_length = first.header.length;
        let mut last_fragment_end = 0;

        for h in skip_handled {
            // A different seq means we're looking at a different handshake
            if wanted_seq != h.header.message_seq {
                continue;
            }

            // Check fragment contiguity
            if h.header.fragment_offset != last_fragment_end {
                return false;
            }
            last_fragment_end = h.header.fragment_offset + h.header.fragment_length;

            // Found the last fragment to complete the wanted handshake.
            if last_fragment_end == wanted_length {
                return true;
            }
        }

        false
    }

    /// The type of the first unhandled handshake message, when it is
    /// the one expected next in sequence. Lets the state machine branch
    /// on optional messages and reject out-of-place ones.
    pub fn incoming_handshake_type(&self) -> Option<MessageType> {
        let h = self
            .queue_rx
            .iter()
            .flat_map(|i| i.records().iter())
            .skip_while(|r| r.is_handled())
            .flat_map(|r| r.handshakes().iter())
            .find(|h| !h.is_handled())?;

        if h.header.message_seq != self.peer_handshake_seq_no {
            return None;
        }

        Some(h.header.msg_type)
    }

    pub fn next_handshake(
        &mut self,
        wanted: MessageType,
        defragment_buffer: &mut Buf,
    ) -> Result<Option<Handshake>, Error> {
        if !self.has_complete_handshake(wanted) {
            return Ok(None);
        }

        let iter = self
            .queue_rx
            .iter()
            .flat_map(|i| i.records().iter())
            .skip_while(|r| r.is_handled())
            .flat_map(|r| r.handshakes().iter().map(move |h| (h, r.buffer())))
            .skip_while(|(h, _)| h.is_handled());

        // This sets the handled flag on the handshake fragments.
        let handshake = Handshake::defragment(
            iter,
            defragment_buffer,
            self.wire,
            self.security.cipher_suite(),
            None,
        )?;

        // Append header + body to the transcript, the same bytes both
        // sides hash for Finished and CertificateVerify.
        let mut header_buf = self.buffers_free.pop();
        Handshake::serialize_header(&handshake.header, self.wire, &mut header_buf);
        self.transcript.extend_from_slice(&header_buf);
        self.transcript
            .extend_from_slice(&defragment_buffer[..handshake.header.length as usize]);
        self.buffers_free.push(header_buf);

        // Move the expected seq_no along
        self.peer_handshake_seq_no = handshake.header.message_seq + 1;

        Ok(Some(handshake))
    }

    pub(crate) fn next_record(&mut self, ctype: ContentType) -> Option<&Record> {
        let record = self
            .queue_rx
            .iter()
            .flat_map(|i| i.records().iter())
            .find(|r| !r.is_handled())?;

        if record.record().content_type != ctype {
            return None;
        }

        record.set_handled();

        Some(record)
    }

    /// Mark any pending ChangeCipherSpec records as handled and purge them.
    /// We can accumulate multiple ChangeCipherSpec due to resends. Since they
    /// don't have any Handshake message_seq and each resend gives a new record
    /// sequence number, we might have multiple.
    pub fn drop_pending_ccs(&mut self) {
        for incoming in self.queue_rx.iter() {
            for record in incoming.records().iter() {
                if record.record().content_type == ContentType::ChangeCipherSpec {
                    record.set_handled();
                }
            }
        }
    }

    /// Process alert and heartbeat records wherever they sit in the
    /// incoming queue. Both can arrive at any point in the connection.
    pub fn process_protocol_records(&mut self) -> Result<(), Error> {
        let mut heartbeat_requests: Vec<Heartbeat> = Vec::new();
        let mut fatal: Option<Alert> = None;

        for incoming in self.queue_rx.iter() {
            for record in incoming.records().iter() {
                if record.is_handled() {
                    continue;
                }

                match record.record().content_type {
                    ContentType::Alert => {
                        record.set_handled();
                        let fragment = record.record().fragment(record.buffer());
                        let Ok((_, alert)) = Alert::parse(fragment) else {
                            return Err(Error::ParseError("Bad alert record".to_string()));
                        };

                        if alert.description == AlertDescription::CloseNotify {
                            debug!("Peer sent close_notify");
                            self.peer_closed = true;
                        } else if alert.is_fatal() {
                            fatal.get_or_insert(alert);
                        } else {
                            debug!("Peer warning alert: {}", alert);
                        }
                    }
                    ContentType::Heartbeat => {
                        record.set_handled();
                        let fragment = record.record().fragment(record.buffer());
                        let Ok((_, heartbeat)) = Heartbeat::parse(fragment) else {
                            return Err(Error::ParseError("Bad heartbeat record".to_string()));
                        };

                        match heartbeat.message_type {
                            HeartbeatMessageType::Request => {
                                heartbeat_requests.push(heartbeat)
                            }
                            HeartbeatMessageType::Response => {
                                trace!(
                                    "Heartbeat response, {} byte payload",
                                    heartbeat.payload.len()
                                );
                            }
                            HeartbeatMessageType::Unknown(v) => {
                                debug!("Ignoring heartbeat message type {}", v);
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        if let Some(alert) = fatal {
            warn!("Peer fatal alert: {}", alert);
            return Err(Error::PeerAlert(alert));
        }

        // Only answer requests when we advertised willingness to
        // receive them (RFC 6520 §2).
        let respond = self.config.heartbeat() == Some(HeartbeatMode::PeerAllowedToSend);

        for request in heartbeat_requests {
            if !respond {
                debug!("Dropping heartbeat request, peer not allowed to send");
                continue;
            }

            let response = request.response_to();
            let mut out = self.buffers_free.pop();
            response.serialize(&mut out, &mut self.rng);

            let epoch = self.tx_epoch;
            self.create_record(ContentType::Heartbeat, epoch, false, |fragment| {
                fragment.extend_from_slice(&out);
            })?;
            self.buffers_free.push(out);
        }

        Ok(())
    }

    pub fn set_peer_heartbeat(&mut self, mode: Option<HeartbeatMode>) {
        self.heartbeat_peer = mode;
    }

    /// Send a heartbeat request. Only valid when the peer advertised
    /// willingness to receive them.
    pub fn send_heartbeat_request(&mut self, payload: &[u8]) -> Result<(), Error> {
        if self.heartbeat_peer != Some(HeartbeatMode::PeerAllowedToSend) {
            return Err(Error::UnexpectedMessage(
                "Peer does not accept heartbeat requests".to_string(),
            ));
        }

        let request = Heartbeat::request(payload.to_vec());
        let mut out = self.buffers_free.pop();
        request.serialize(&mut out, &mut self.rng);

        let epoch = self.tx_epoch;
        self.create_record(ContentType::Heartbeat, epoch, false, |fragment| {
            fragment.extend_from_slice(&out);
        })?;
        self.buffers_free.push(out);

        Ok(())
    }

    /// Create a record and serialize it into an outgoing packet buffer
    pub fn create_record<F>(
        &mut self,
        content_type: ContentType,
        epoch: u16,
        save_fragment: bool,
        f: F,
    ) -> Result<(), Error>
    where
        F: FnOnce(&mut Buf),
    {
        // Prepare the plaintext fragment
        let mut fragment = self.buffers_free.pop();

        // Let the caller fill the fragment (plaintext)
        f(&mut fragment);

        // Use this as a marker to know whether we are to record fragments for
        // resends. Stream transports retransmit on their own.
        if save_fragment && self.wire == WireFormat::Datagram {
            let mut clone = self.buffers_free.pop();
            clone.extend_from_slice(&fragment);
            self.flight_saved_records.push(Entry {
                content_type,
                epoch,
                fragment: clone,
            });
        }

        // Compute wire length of the record if serialized into a packet:
        // record header + fragment bytes + AEAD overhead (if epoch >= 1)
        let overhead = if epoch >= 1 { AEAD_OVERHEAD } else { 0 };
        let record_wire_len = self.wire.header_len() + fragment.len() + overhead;

        // Decide whether to append to the existing last packet or create a new one
        let can_append = self
            .queue_tx
            .back()
            .map(|b| b.len() + record_wire_len <= self.config.mtu())
            .unwrap_or(false);

        // If we cannot append, ensure we have space for a new packet
        if !can_append && self.queue_tx.len() >= self.config.max_queue_tx() {
            warn!(
                "Transmit queue full (max {}): {:?}",
                self.config.max_queue_tx(),
                self.queue_tx
            );
            return Err(Error::TransmitQueueFull);
        }

        // Sequence number to use for this record
        let sequence = if epoch == 0 {
            self.sequence_epoch_0
        } else {
            self.sequence_epoch_n
        };
        let length = fragment.len() as u16;

        // Handle encryption for epochs >= 1
        if epoch >= 1 {
            let iv = self.write_iv()?;

            // Generate 8 random bytes for the explicit part of the nonce
            let explicit_nonce: [u8; 8] = self.rng.random();

            // Combine the fixed IV and the explicit nonce
            let nonce = Nonce::new(iv, &explicit_nonce);

            // AES-GCM per RFC 5288: AAD uses the plaintext length. The record
            // fragment on the wire will be:
            // 8-byte explicit nonce || ciphertext(plaintext) || 16-byte GCM tag.
            let aad = Aad::new(content_type, self.wire.version(), sequence, length);

            // Encrypt the fragment in-place
            self.encrypt_data(&mut fragment, aad, nonce)?;
            let ctext_len = fragment.len();

            // Increase the size to make space for the explicit nonce.
            fragment.resize(EXPLICIT_NONCE_LEN + ctext_len, 0);

            // Shift the encrypted data to make space for the nonce and write it
            fragment.copy_within(0..ctext_len, EXPLICIT_NONCE_LEN);
            fragment[..EXPLICIT_NONCE_LEN].copy_from_slice(&explicit_nonce);
        }

        // Build the record structure referencing the (possibly encrypted) fragment
        let record = WireRecord {
            content_type,
            version: self.wire.version(),
            sequence,
            length: fragment.len() as u16,
            fragment_range: 0..fragment.len(),
        };

        // Increment the sequence number for the next transmission
        if epoch == 0 {
            self.sequence_epoch_0.sequence_number += 1;
        } else {
            self.sequence_epoch_n.sequence_number += 1;
        }

        // Serialize the record into the chosen packet buffer
        if can_append {
            let last = self.queue_tx.back_mut().unwrap();
            record.serialize(self.wire, &fragment, last);
        } else {
            let mut buffer = self.buffers_free.pop();
            buffer.clear();
            record.serialize(self.wire, &fragment, &mut buffer);
            self.queue_tx.push_back(buffer);
        }

        // Return the fragment buffer to the pool
        self.buffers_free.push(fragment);

        Ok(())
    }

    /// Create a handshake message and wrap it in one or more records
    pub fn create_handshake<F>(&mut self, msg_type: MessageType, f: F) -> Result<(), Error>
    where
        F: FnOnce(&mut Buf, &mut Self) -> Result<(), Error>,
    {
        // Get a buffer for the handshake body
        let mut body_buffer = self.buffers_free.pop();

        // Let the callback fill the handshake body
        f(&mut body_buffer, self)?;

        // Create the handshake header with the next sequence number
        let handshake_header = Header {
            msg_type,
            length: body_buffer.len() as u32,
            message_seq: self.next_handshake_seq_no,
            fragment_offset: 0,
            fragment_length: body_buffer.len() as u32,
        };

        let mut buffer_full = self.buffers_free.pop();
        {
            let handshake = Handshake {
                header: handshake_header,
                body: Body::Fragment(0..body_buffer.len()),
                handled: AtomicBool::new(false),
            };
            // Serialize with body_buffer as source
            handshake.serialize(self.wire, &body_buffer, &mut buffer_full);
        }
        self.transcript.extend_from_slice(&buffer_full);

        // Increment the sequence number for the next handshake message
        self.next_handshake_seq_no += 1;

        let epoch = msg_type.epoch();

        if self.wire == WireFormat::Stream {
            // The reliable transport does its own segmentation, so the
            // message goes out as a single record.
            self.create_record(ContentType::Handshake, epoch, false, |fragment| {
                fragment.extend_from_slice(&buffer_full);
            })?;

            self.buffers_free.push(buffer_full);
            self.buffers_free.push(body_buffer);
            return Ok(());
        }

        self.buffers_free.push(buffer_full);

        // We want to pack as much as possible into the outgoing datagram and
        // remain within the MTU. Fragment the handshake across records as needed.

        let total_len = body_buffer.len();
        let mut offset: usize = 0;

        let handshake_header_len = self.wire.handshake_header_len();
        let aead_overhead = if epoch >= 1 { AEAD_OVERHEAD } else { 0 };

        // At least one record must be created even if total_len == 0
        while offset < total_len || (total_len == 0 && offset == 0) {
            // How many bytes are already used in the current datagram (if any)?
            let already_used_in_current = self.queue_tx.back().map(|b| b.len()).unwrap_or(0);
            let available_in_current = self.config.mtu().saturating_sub(already_used_in_current);

            // Fixed overhead per handshake record on the wire:
            // record header + handshake header + AEAD overhead (if epoch >= 1)
            let fixed_overhead = self.wire.header_len() + handshake_header_len + aead_overhead;

            // Prefer to pack into the current datagram. If the current one cannot fit even
            // the fixed overhead, we will start a fresh datagram and compute space again.
            let available_for_body = if available_in_current > fixed_overhead {
                // There is room for at least 1 byte of handshake body in the current datagram
                available_in_current - fixed_overhead
            } else {
                // Not enough space in the current datagram for any body bytes; start a fresh datagram
                self.config.mtu().saturating_sub(fixed_overhead)
            };

            // Remaining bytes from the handshake body we still need to send.
            let remaining_body_bytes = total_len.saturating_sub(offset);

            // For empty-body handshakes (e.g., ServerHelloDone), we still send a header-only record.
            let chunk_len = if total_len == 0 {
                0
            } else {
                remaining_body_bytes.min(available_for_body)
            };

            let frag_range = if chunk_len == 0 {
                0..0
            } else {
                offset..offset + chunk_len
            };

            let frag_handshake = Handshake {
                header: Header {
                    msg_type,
                    length: handshake_header.length,
                    message_seq: handshake_header.message_seq,
                    fragment_offset: offset as u32,
                    fragment_length: chunk_len as u32,
                },
                body: Body::Fragment(frag_range),
                handled: AtomicBool::new(false),
            };

            let wire = self.wire;

            // Emit the record; packing into current datagram happens inside create_record
            self.create_record(ContentType::Handshake, epoch, true, |fragment| {
                // Serialize with body_buffer as source
                frag_handshake.serialize(wire, &body_buffer, fragment);
            })?;

            if total_len == 0 {
                // Nothing more to send for empty-body handshake
                break;
            }

            offset += chunk_len;
        }

        // Return the buffer
        self.buffers_free.push(body_buffer);

        Ok(())
    }

    /// Send application data, chunked to the negotiated fragment limit.
    pub fn create_application_data(&mut self, data: &[u8]) -> Result<(), Error> {
        if self.tx_epoch == 0 {
            return Err(Error::UnexpectedMessage(
                "Application data before handshake completion".to_string(),
            ));
        }

        // Datagram records must additionally fit the MTU.
        let max_chunk = match self.wire {
            WireFormat::Stream => self.max_fragment,
            WireFormat::Datagram => self.max_fragment.min(
                self.config
                    .mtu()
                    .saturating_sub(self.wire.header_len() + AEAD_OVERHEAD),
            ),
        };

        let epoch = self.tx_epoch;
        for chunk in data.chunks(max_chunk.max(1)) {
            self.create_record(ContentType::ApplicationData, epoch, false, |fragment| {
                fragment.extend_from_slice(chunk);
            })?;
        }

        Ok(())
    }

    pub fn send_alert(&mut self, alert: Alert) -> Result<(), Error> {
        debug!("Sending alert: {}", alert);
        let epoch = self.tx_epoch;
        self.create_record(ContentType::Alert, epoch, false, |fragment| {
            alert.serialize(fragment);
        })
    }

    pub fn send_close_notify(&mut self) -> Result<(), Error> {
        self.send_alert(Alert::warning(AlertDescription::CloseNotify))
    }

    /// Release application data from the incoming queue
    pub fn release_application_data(&mut self) {
        self.release_app_data = true;
    }

    /// Pop a buffer from the buffer pool for temporary use
    pub(crate) fn pop_buffer(&mut self) -> Buf {
        self.buffers_free.pop()
    }

    /// Return a buffer to the buffer pool
    pub(crate) fn push_buffer(&mut self, buf: Buf) {
        self.buffers_free.push(buf);
    }

    pub fn push_peer_cert(&mut self, cert: &[u8]) {
        self.peer_certs.push(Buf::from_slice(cert));
        if self.peer_certs.len() == 1 {
            self.local_events.push_back(LocalEvent::PeerCert);
        }
    }

    pub fn push_connected(&mut self) {
        self.local_events.push_back(LocalEvent::Connected);
    }

    pub fn push_supplemental_data(&mut self, data_type: u16, data: &[u8]) {
        self.local_events
            .push_back(LocalEvent::SupplementalData(data_type, Buf::from_slice(data)));
    }

    /// Derive the record ciphers for both directions from the master
    /// secret and the exchanged randoms.
    pub fn derive_record_ciphers(&mut self) -> Result<(), Error> {
        let Some(suite) = self.security.cipher_suite() else {
            return Err(Error::UnexpectedMessage(
                "No cipher suite selected".to_string(),
            ));
        };

        let key_block = self
            .security
            .derive_key_block()
            .map_err(Error::CryptoError)?;

        self.ciphers = Some(create_record_ciphers(suite, &key_block)?);

        Ok(())
    }

    /// The fixed IV for our own write direction.
    fn write_iv(&self) -> Result<Iv, Error> {
        let Some(pair) = self.ciphers.as_ref() else {
            return Err(Error::CryptoError("Write cipher not derived".to_string()));
        };

        let iv = if self.is_client {
            pair.client_write.fixed_iv
        } else {
            pair.server_write.fixed_iv
        };

        Ok(iv)
    }

    /// The fixed IV for the peer's write direction.
    fn peer_iv(&self) -> Iv {
        // Invariant: records are only decrypted after key derivation.
        let pair = self.ciphers.as_ref().expect("Read cipher not derived");

        if self.is_client {
            pair.server_write.fixed_iv
        } else {
            pair.client_write.fixed_iv
        }
    }

    /// Encrypt with our own write cipher.
    fn encrypt_data(&mut self, plaintext: &mut Buf, aad: Aad, nonce: Nonce) -> Result<(), Error> {
        let Some(pair) = self.ciphers.as_mut() else {
            return Err(Error::CryptoError("Write cipher not derived".to_string()));
        };

        let dir = if self.is_client {
            &mut pair.client_write
        } else {
            &mut pair.server_write
        };

        dir.cipher
            .encrypt(plaintext, &aad, nonce)
            .map_err(Error::CryptoError)
    }

    pub fn transcript_bytes(&self) -> &[u8] {
        self.transcript.as_bytes()
    }

    pub fn set_cipher_suite(&mut self, cipher_suite: CipherSuite) {
        self.security.set_cipher_suite(cipher_suite);
        // The suite fixes the digest for the handshake hash.
        self.transcript.seal(cipher_suite.hash_algorithm());
    }

    pub fn set_max_fragment_length(&mut self, max: usize) {
        self.max_fragment = max.min(MAX_PLAINTEXT_LEN);
    }

    /// Start encrypting our own direction. Called right after our
    /// ChangeCipherSpec is queued.
    pub fn enable_local_encryption(&mut self) {
        debug!("Local encryption enabled");
        self.tx_epoch = 1;
    }

    pub fn enable_peer_encryption(&mut self) -> Result<(), Error> {
        debug!("Peer encryption enabled");
        self.peer_encryption_enabled = true;

        match self.wire {
            WireFormat::Stream => {
                // Records after the ChangeCipherSpec are under the new
                // cipher; resume framing with a fresh implicit sequence.
                self.stream_rx_sequence = Sequence::new(self.stream_rx_sequence.epoch + 1);
                self.stream_hold = false;
                self.drive_stream_rx()
            }
            WireFormat::Datagram => {
                let maybe_index_epoch1 = self
                    .queue_rx
                    .iter()
                    .position(|i| i.records().iter().any(|r| r.record().sequence.epoch == 1));

                let Some(index_epoch1) = maybe_index_epoch1 else {
                    return Ok(());
                };

                // Now decrypt all entries remaining.
                let all = self.queue_rx.split_off(index_epoch1);

                for incoming in all {
                    let unhandled = incoming.into_records().filter(|r| !r.is_handled());

                    for record in unhandled {
                        let buf = record.into_buffer();
                        self.parse_packet(&buf)?;
                        self.buffers_free.push(buf);
                    }
                }

                Ok(())
            }
        }
    }

    pub fn generate_verify_data(&mut self, is_client: bool) -> Result<[u8; 12], Error> {
        let Some(suite) = self.security.cipher_suite() else {
            return Err(Error::UnexpectedMessage(
                "No cipher suite selected".to_string(),
            ));
        };

        let Some(master_secret) = self.security.master_secret() else {
            return Err(Error::CryptoError("Master secret not derived".to_string()));
        };
        let master_secret = *master_secret;

        let mut handshake_hash = self.buffers_free.pop();
        self.transcript.hash(&mut handshake_hash);

        let result = verify_data(
            &master_secret,
            &handshake_hash,
            is_client,
            suite.hash_algorithm(),
        )
        .map_err(Error::CryptoError);

        self.buffers_free.push(handshake_hash);

        result
    }
}

impl RecordDecrypt for Engine {
    fn is_peer_encryption_enabled(&self) -> bool {
        self.peer_encryption_enabled
    }

    fn replay_check_and_update(&mut self, seq: Sequence) -> bool {
        // The window tracks a single epoch at a time. Datagram epochs
        // only move forward, so reset on change.
        if seq.epoch != self.replay_epoch {
            self.replay = ReplayWindow::new();
            self.replay_epoch = seq.epoch;
        }

        self.replay.check_and_update(seq.sequence_number)
    }

    fn decryption_aad_and_nonce(&self, record: &WireRecord, buf: &[u8]) -> (Aad, Nonce) {
        // AES-GCM: AAD uses the plaintext length. The fragment on the wire is
        // 8-byte explicit nonce || ciphertext || 16-byte GCM tag. Recover
        // plaintext length from the record header's length field.
        let plaintext_len = record.length.saturating_sub(AEAD_OVERHEAD as u16);
        let aad = Aad::new(
            record.content_type,
            record.version,
            record.sequence,
            plaintext_len,
        );
        let iv = self.peer_iv();
        let nonce = Nonce::new(iv, record.nonce(buf));
        (aad, nonce)
    }

    fn decrypt_data(
        &mut self,
        ciphertext: &mut TmpBuf,
        aad: Aad,
        nonce: Nonce,
    ) -> Result<(), Error> {
        let Some(pair) = self.ciphers.as_mut() else {
            return Err(Error::CryptoError("Read cipher not derived".to_string()));
        };

        let dir = if self.is_client {
            &mut pair.server_write
        } else {
            &mut pair.client_write
        };

        dir.cipher
            .decrypt(ciphertext, &aad, nonce)
            .map_err(Error::BadRecordMac)
    }
}
