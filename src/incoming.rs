use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};

use arrayvec::ArrayVec;
use log::trace;

use crate::buffer::{Buf, TmpBuf};
use crate::crypto::{Aad, Nonce, EXPLICIT_NONCE_LEN};
use crate::message::Record as WireRecord;
use crate::message::{CipherSuite, Handshake};
use crate::types::{ContentType, Sequence, WireFormat};
use crate::Error;

/// Holds both a received datagram and the parsed result of that datagram.
pub struct Incoming {
    // Box is here to reduce the size of the Incoming struct
    // to be passed in register instead of using memmove.
    records: Box<Records>,
}

impl Incoming {
    pub fn records(&self) -> &Records {
        &self.records
    }

    pub fn first(&self) -> &Record {
        // Invariant: Every Incoming must have at least one Record
        // or the parser of Incoming returns None.
        &self.records()[0]
    }

    pub fn into_records(self) -> impl Iterator<Item = Record> {
        self.records.records.into_iter()
    }

    /// Parse an incoming datagram.
    ///
    /// * `packet` is the data from the socket.
    /// * `decrypt` provides the decryption operations for encrypted records.
    /// * `cs` is the negotiated cipher suite, if any.
    ///
    /// Will surface parser errors.
    pub fn parse_datagram(
        packet: &[u8],
        decrypt: &mut dyn RecordDecrypt,
        cs: Option<CipherSuite>,
    ) -> Result<Option<Self>, Error> {
        // Parse records directly from packet, copying each record ONCE into its own buffer
        let records = Records::parse(packet, decrypt, cs)?;

        // We need at least one Record to be valid. For replayed frames, we discard
        // the records, hence this might be None
        if records.records.is_empty() {
            return Ok(None);
        }

        let records = Box::new(records);

        Ok(Some(Incoming { records }))
    }

    /// Wrap a single already-parsed record. Used by the stream receive
    /// path, which framing happens one record at a time.
    pub(crate) fn single(record: Record) -> Self {
        let mut records = ArrayVec::new();
        records.push(record);
        Incoming {
            records: Box::new(Records { records }),
        }
    }
}

/// A number of records parsed from a single datagram.
#[derive(Debug)]
pub struct Records {
    pub records: ArrayVec<Record, 8>,
}

impl Records {
    pub fn parse(
        mut packet: &[u8],
        decrypt: &mut dyn RecordDecrypt,
        cs: Option<CipherSuite>,
    ) -> Result<Records, Error> {
        const HEADER_LEN: usize = 13;

        let mut records = ArrayVec::new();

        // Find record boundaries and copy each record ONCE from the packet
        while !packet.is_empty() {
            if packet.len() < HEADER_LEN {
                return Err(Error::ParseIncomplete);
            }

            let length_bytes: [u8; 2] = packet[HEADER_LEN - 2..HEADER_LEN].try_into().unwrap();
            let length = u16::from_be_bytes(length_bytes) as usize;
            let record_end = HEADER_LEN + length;

            if packet.len() < record_end {
                return Err(Error::ParseIncomplete);
            }

            // This is the ONLY copy: packet -> record buffer
            let record_slice = &packet[..record_end];
            match Record::parse_datagram(record_slice, decrypt, cs) {
                Ok(record) => {
                    if let Some(record) = record {
                        if records.try_push(record).is_err() {
                            return Err(Error::TooManyRecords);
                        }
                    } else {
                        trace!("Discarding replayed rec");
                    }
                }
                // A forged or corrupt datagram record is dropped without
                // tearing down the connection.
                Err(Error::BadRecordMac(e)) => {
                    trace!("Discarding undecryptable rec: {}", e);
                }
                Err(e) => return Err(e),
            }

            packet = &packet[record_end..];
        }

        Ok(Records { records })
    }
}

impl Deref for Records {
    type Target = [Record];

    fn deref(&self) -> &Self::Target {
        &self.records
    }
}

pub struct Record {
    buffer: Buf,
    // Box is here to reduce the size of the Record struct
    // to be passed in register instead of using memmove.
    parsed: Box<ParsedRecord>,
}

impl Record {
    /// The first parse pass only parses the record header which is unencrypted.
    /// Copies record data from the packet ONCE into a pooled buffer.
    pub fn parse_datagram(
        record_slice: &[u8],
        decrypt: &mut dyn RecordDecrypt,
        cs: Option<CipherSuite>,
    ) -> Result<Option<Record>, Error> {
        // ONLY COPY: packet slice -> pooled buffer
        let mut buffer = Buf::new();
        buffer.extend_from_slice(record_slice);
        let parsed = ParsedRecord::parse(&buffer, WireFormat::Datagram, cs, 0)?;
        let parsed = Box::new(parsed);
        let record = Record { buffer, parsed };

        // It is not enough to only look at the epoch, since to be able to decrypt the entire
        // preceeding set of flights sets up the cryptographic context. In a situation with
        // packet loss, we can end up seeing epoch 1 records before we can decrypt them.
        let is_epoch_0 = record.record().sequence.epoch == 0;
        if is_epoch_0 || !decrypt.is_peer_encryption_enabled() {
            return Ok(Some(record));
        }

        // Anti-replay check
        if !decrypt.replay_check_and_update(record.record().sequence) {
            return Ok(None);
        }

        let record = record.decrypt_in_place(WireFormat::Datagram, decrypt, cs)?;
        Ok(Some(record))
    }

    /// Parse one complete record cut out of a byte stream.
    ///
    /// The stream header carries no epoch or sequence number; the caller
    /// supplies the implicit `sequence` from its receive counter. No
    /// anti-replay check applies since the transport is ordered.
    pub fn parse_stream(
        record_slice: &[u8],
        sequence: Sequence,
        decrypt: &mut dyn RecordDecrypt,
        cs: Option<CipherSuite>,
    ) -> Result<Record, Error> {
        let mut buffer = Buf::new();
        buffer.extend_from_slice(record_slice);
        let mut parsed = ParsedRecord::parse(&buffer, WireFormat::Stream, cs, 0)?;
        parsed.record.sequence = sequence;
        let parsed = Box::new(parsed);
        let record = Record { buffer, parsed };

        if !decrypt.is_peer_encryption_enabled() {
            return Ok(record);
        }

        let mut record = record.decrypt_in_place(WireFormat::Stream, decrypt, cs)?;
        record.parsed.record.sequence = sequence;
        Ok(record)
    }

    /// Decrypt the record payload in place and redo the parsing.
    fn decrypt_in_place(
        self,
        wire: WireFormat,
        decrypt: &mut dyn RecordDecrypt,
        cs: Option<CipherSuite>,
    ) -> Result<Record, Error> {
        let (aad, nonce) = decrypt.decryption_aad_and_nonce(self.record(), &self.buffer);

        // Extract the buffer for decryption
        let mut buffer = self.buffer;

        // Where the encrypted ciphertext starts
        let ciph = wire.header_len() + EXPLICIT_NONCE_LEN;

        // The encrypted part is after the record header and explicit nonce.
        // The entire buffer is only the single record, since datagrams are
        // chunked up in Records::parse() and streams framed by the caller.
        let ciphertext = &mut buffer[ciph..];

        let new_len = {
            let mut tmp = TmpBuf::new(ciphertext);

            // This decrypts in place.
            decrypt.decrypt_data(&mut tmp, aad, nonce)?;

            tmp.len()
        };

        // Update the length field of the record header.
        let length_offset = wire.header_len() - 2;
        buffer[length_offset] = (new_len >> 8) as u8;
        buffer[length_offset + 1] = new_len as u8;

        let parsed = ParsedRecord::parse(&buffer, wire, cs, EXPLICIT_NONCE_LEN)?;
        let parsed = Box::new(parsed);

        Ok(Record { buffer, parsed })
    }

    /// Build a record holding one complete handshake message reassembled
    /// from a byte stream. The buffer is a stream-encoded handshake
    /// (4-byte header plus body); `message_seq` comes from the engine's
    /// receive counter since stream messages carry none on the wire.
    pub(crate) fn reassembled_handshake(
        buffer: Buf,
        message_seq: u16,
        cs: Option<CipherSuite>,
    ) -> Result<Record, Error> {
        let (rest, mut handshake) = Handshake::parse(&buffer, WireFormat::Stream, 0, cs, true)?;
        if !rest.is_empty() {
            return Err(Error::ParseError(
                "Trailing bytes after reassembled handshake".into(),
            ));
        }
        handshake.header.message_seq = message_seq;

        let record = WireRecord {
            content_type: ContentType::Handshake,
            version: WireFormat::Stream.version(),
            sequence: Sequence::default(),
            length: buffer.len() as u16,
            fragment_range: 0..buffer.len(),
        };

        let mut handshakes = ArrayVec::new();
        handshakes.push(handshake);

        let parsed = Box::new(ParsedRecord {
            record,
            handshakes,
            handled: AtomicBool::new(false),
        });

        Ok(Record { buffer, parsed })
    }

    pub fn record(&self) -> &WireRecord {
        &self.parsed.record
    }

    pub fn handshakes(&self) -> &[Handshake] {
        &self.parsed.handshakes
    }

    pub fn first_handshake(&self) -> Option<&Handshake> {
        self.parsed.handshakes.first()
    }

    pub fn is_handled(&self) -> bool {
        if self.parsed.handshakes.is_empty() {
            self.parsed.handled.load(Ordering::Relaxed)
        } else {
            self.parsed.handshakes.iter().all(|h| h.is_handled())
        }
    }

    pub fn set_handled(&self) {
        // Handshakes should be empty because we set_handled() on them individually
        // during defragmentation. set_handled() on the record is only for non-handshakes.
        assert!(self.parsed.handshakes.is_empty());
        self.parsed.handled.store(true, Ordering::Relaxed);
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub(crate) fn into_buffer(self) -> Buf {
        self.buffer
    }
}

pub struct ParsedRecord {
    record: WireRecord,
    handshakes: ArrayVec<Handshake, 8>,
    handled: AtomicBool,
}

impl ParsedRecord {
    pub fn parse(
        input: &[u8],
        wire: WireFormat,
        cipher_suite: Option<CipherSuite>,
        offset: usize,
    ) -> Result<ParsedRecord, Error> {
        let (_, record) = WireRecord::parse(input, wire, 0, offset)?;

        // Stream handshake messages can straddle record boundaries, so the
        // engine reassembles them from the decrypted fragments instead of
        // parsing them per record here.
        let handshakes = if record.content_type == ContentType::Handshake
            && wire == WireFormat::Datagram
        {
            // This will also return None on the encrypted Finished after ChangeCipherSpec.
            // However we will then decrypt and try again.
            let fragment_offset = record.fragment_range.start;
            parse_handshakes(record.fragment(input), fragment_offset, cipher_suite)
        } else {
            ArrayVec::new()
        };

        Ok(ParsedRecord {
            record,
            handshakes,
            handled: AtomicBool::new(false),
        })
    }
}

/// Trait abstracting the decryption operations needed for parsing incoming records.
///
/// This decouples the record parser from the full `Engine`, allowing incoming record
/// parsing to depend only on the cryptographic operations it actually uses.
pub trait RecordDecrypt {
    fn is_peer_encryption_enabled(&self) -> bool;
    fn replay_check_and_update(&mut self, seq: Sequence) -> bool;
    fn decryption_aad_and_nonce(&self, record: &WireRecord, buf: &[u8]) -> (Aad, Nonce);
    fn decrypt_data(
        &mut self,
        ciphertext: &mut TmpBuf,
        aad: Aad,
        nonce: Nonce,
    ) -> Result<(), Error>;
}

fn parse_handshakes(
    mut input: &[u8],
    mut base_offset: usize,
    cipher_suite: Option<CipherSuite>,
) -> ArrayVec<Handshake, 8> {
    let mut handshakes = ArrayVec::new();
    while !input.is_empty() {
        if let Ok((remaining, handshake)) =
            Handshake::parse(input, WireFormat::Datagram, base_offset, cipher_suite, true)
        {
            let len = input.len() - remaining.len();
            base_offset += len;
            input = remaining;
            if handshakes.try_push(handshake).is_err() {
                break;
            }
        } else {
            break;
        }
    }
    handshakes
}

impl fmt::Debug for Incoming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Incoming")
            .field("records", &self.records())
            .finish()
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("record", &self.parsed.record)
            .field("handshakes", &self.parsed.handshakes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;

    struct NoDecrypt;

    impl RecordDecrypt for NoDecrypt {
        fn is_peer_encryption_enabled(&self) -> bool {
            false
        }
        fn replay_check_and_update(&mut self, _seq: Sequence) -> bool {
            true
        }
        fn decryption_aad_and_nonce(&self, _record: &WireRecord, _buf: &[u8]) -> (Aad, Nonce) {
            unreachable!()
        }
        fn decrypt_data(
            &mut self,
            _ciphertext: &mut TmpBuf,
            _aad: Aad,
            _nonce: Nonce,
        ) -> Result<(), Error> {
            unreachable!()
        }
    }

    fn datagram_hello_done(message_seq: u16) -> Vec<u8> {
        let mut packet = vec![
            0x16, // handshake
            0xFE, 0xFD, // DTLS 1.2
            0x00, 0x00, // epoch
            0x00, 0x00, 0x00, 0x00, 0x00, 0x05, // sequence
            0x00, 0x0C, // length
        ];
        packet.extend_from_slice(&[
            14, // server_hello_done
            0x00, 0x00, 0x00, // length
        ]);
        packet.extend_from_slice(&message_seq.to_be_bytes());
        packet.extend_from_slice(&[
            0x00, 0x00, 0x00, // fragment_offset
            0x00, 0x00, 0x00, // fragment_length
        ]);
        packet
    }

    #[test]
    fn parse_plaintext_datagram() {
        let packet = datagram_hello_done(3);

        let incoming = Incoming::parse_datagram(&packet, &mut NoDecrypt, None)
            .unwrap()
            .unwrap();
        assert_eq!(incoming.records().len(), 1);

        let record = incoming.first();
        assert_eq!(record.record().sequence.sequence_number, 5);
        let handshake = record.first_handshake().unwrap();
        assert_eq!(handshake.header.msg_type, MessageType::ServerHelloDone);
        assert_eq!(handshake.header.message_seq, 3);
    }

    #[test]
    fn multiple_records_in_one_datagram() {
        let mut packet = datagram_hello_done(3);
        packet.extend_from_slice(&datagram_hello_done(4));

        let incoming = Incoming::parse_datagram(&packet, &mut NoDecrypt, None)
            .unwrap()
            .unwrap();
        assert_eq!(incoming.records().len(), 2);
    }

    #[test]
    fn truncated_datagram_is_incomplete() {
        let packet = datagram_hello_done(3);
        let result = Incoming::parse_datagram(&packet[..packet.len() - 1], &mut NoDecrypt, None);
        assert!(matches!(result, Err(Error::ParseIncomplete)));
    }

    #[test]
    fn parse_stream_record_takes_caller_sequence() {
        let mut record_slice = vec![
            0x16, // handshake
            0x03, 0x03, // TLS 1.2
            0x00, 0x04, // length
        ];
        record_slice.extend_from_slice(&[14, 0x00, 0x00, 0x00]);

        let sequence = Sequence {
            epoch: 0,
            sequence_number: 7,
        };
        let record = Record::parse_stream(&record_slice, sequence, &mut NoDecrypt, None).unwrap();
        assert_eq!(record.record().sequence, sequence);
        // Stream handshake reassembly happens in the engine.
        assert!(record.handshakes().is_empty());
    }

    #[test]
    fn reassembled_handshake_carries_message_seq() {
        let mut buffer = Buf::new();
        buffer.extend_from_slice(&[14, 0x00, 0x00, 0x00]);

        let record = Record::reassembled_handshake(buffer, 9, None).unwrap();
        let handshake = record.first_handshake().unwrap();
        assert_eq!(handshake.header.msg_type, MessageType::ServerHelloDone);
        assert_eq!(handshake.header.message_seq, 9);
        assert_eq!(handshake.header.fragment_offset, 0);
    }
}
