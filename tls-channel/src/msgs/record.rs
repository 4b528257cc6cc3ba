//! Record framing for both transports.
//!
//! Stream records carry a 5 byte header: type, version and length.
//! Datagram records carry a 13 byte header which adds the epoch and a
//! 48-bit sequence number between version and length.

use crate::cipher::ConnectionCipherState;
use crate::enums::{ContentType, ProtocolVersion};
use crate::error::{Error, InvalidMessage};
use crate::log::{trace, warn};
use crate::msgs::base::Payload;
use crate::msgs::codec::Codec;
use crate::msgs::message::{BorrowedPlainMessage, OpaqueMessage};
use crate::seq_numbers::SequenceNumbers;

pub(crate) const STREAM_HEADER_LEN: usize = 1 + 2 + 2;
pub(crate) const DATAGRAM_HEADER_LEN: usize = 1 + 2 + 2 + 6 + 2;

/// One decoded record: authenticated and decrypted if a read cipher state
/// was in force.  Not retained past its dispatch.
#[derive(Debug)]
pub(crate) struct Record {
    pub(crate) typ: ContentType,
    pub(crate) version: ProtocolVersion,
    /// The full sequence number.  For datagrams the epoch is the top 16
    /// bits.
    pub(crate) sequence: u64,
    pub(crate) payload: Vec<u8>,
}

impl Record {
    pub(crate) fn epoch(&self) -> u16 {
        (self.sequence >> 48) as u16
    }
}

/// What `read_record` found at the front of the buffer.
#[derive(Debug)]
pub(crate) enum RecordRead {
    /// The buffer ends part way through a record; this many more bytes
    /// are needed before it can be decoded.
    NeedMore(usize),
    Record(Record),
    /// A datagram that is a replay, from another epoch, forged or
    /// garbled.  Dropped without affecting the connection.
    Discarded,
}

/// Serialize one record, protecting it with `cipher` if given.
///
/// `seq` is the full sequence number: for datagrams it carries the epoch.
pub(crate) fn write_record(
    out: &mut Vec<u8>,
    msg: BorrowedPlainMessage,
    seq: u64,
    cipher: Option<&mut ConnectionCipherState>,
) -> Result<(), Error> {
    let opaque = match cipher {
        Some(cipher) => cipher.encrypt(msg, seq)?,
        None => msg.to_unencrypted_opaque(),
    };

    trace!(
        "writing {:?} record, version {:?}, {} bytes, seq {:#x}",
        opaque.typ,
        opaque.version,
        opaque.payload.0.len(),
        seq
    );

    opaque.typ.encode(out);
    opaque.version.encode(out);
    if opaque.version.is_datagram() {
        seq.encode(out);
    }
    (opaque.payload.0.len() as u16).encode(out);
    out.extend_from_slice(&opaque.payload.0);
    Ok(())
}

/// Decode at most one record from the front of `buf`.
///
/// Returns the number of bytes consumed along with the outcome.  Nothing
/// is consumed when more input is needed, and never more than one record
/// is consumed.  The transport is taken from `seqs` when it exists,
/// otherwise from the record header.
pub(crate) fn read_record(
    buf: &[u8],
    seqs: Option<&mut SequenceNumbers>,
    cipher: Option<&mut ConnectionCipherState>,
) -> Result<(usize, RecordRead), Error> {
    let datagram = match &seqs {
        Some(seqs) => seqs.is_datagram(),
        None if buf.len() < 2 => return Ok((0, RecordRead::NeedMore(STREAM_HEADER_LEN - buf.len()))),
        None => buf[1] == 0xfe,
    };

    match datagram {
        true => Ok(read_datagram_record(buf, seqs, cipher)),
        false => read_stream_record(buf, seqs, cipher),
    }
}

fn read_stream_record(
    buf: &[u8],
    seqs: Option<&mut SequenceNumbers>,
    cipher: Option<&mut ConnectionCipherState>,
) -> Result<(usize, RecordRead), Error> {
    if buf.len() < STREAM_HEADER_LEN {
        return Ok((0, RecordRead::NeedMore(STREAM_HEADER_LEN - buf.len())));
    }

    let typ = ContentType::from(buf[0]);
    let version = ProtocolVersion::from(u16::from_be_bytes([buf[1], buf[2]]));
    let len = usize::from(u16::from_be_bytes([buf[3], buf[4]]));

    if version.major() != 3 {
        return Err(InvalidMessage::UnknownProtocolVersion.into());
    }

    if len > OpaqueMessage::MAX_PAYLOAD {
        return Err(Error::PeerSentOversizedRecord);
    }

    let total = STREAM_HEADER_LEN + len;
    if buf.len() < total {
        return Ok((0, RecordRead::NeedMore(total - buf.len())));
    }

    let sequence = match &seqs {
        Some(seqs) => seqs.next_read_sequence()?,
        None => 0,
    };

    let opaque = OpaqueMessage {
        typ,
        version,
        payload: Payload::new(&buf[STREAM_HEADER_LEN..total]),
    };

    let plain = match cipher {
        Some(cipher) => cipher.decrypt(opaque, sequence)?,
        None => opaque.into_plain_message(),
    };

    if plain.typ != ContentType::ApplicationData && plain.payload.0.is_empty() {
        return Err(InvalidMessage::InvalidEmptyPayload.into());
    }

    if let Some(seqs) = seqs {
        seqs.read_accept(sequence);
    }

    trace!(
        "read {:?} record, version {:?}, {} bytes, seq {}",
        plain.typ,
        plain.version,
        plain.payload.0.len(),
        sequence
    );

    Ok((
        total,
        RecordRead::Record(Record {
            typ: plain.typ,
            version: plain.version,
            sequence,
            payload: plain.payload.0,
        }),
    ))
}

fn read_datagram_record(
    buf: &[u8],
    seqs: Option<&mut SequenceNumbers>,
    cipher: Option<&mut ConnectionCipherState>,
) -> (usize, RecordRead) {
    if buf.len() < DATAGRAM_HEADER_LEN {
        warn!("dropping truncated datagram of {} bytes", buf.len());
        return (buf.len(), RecordRead::Discarded);
    }

    let typ = ContentType::from(buf[0]);
    let version = ProtocolVersion::from(u16::from_be_bytes([buf[1], buf[2]]));
    let mut seq_bytes = [0u8; 8];
    seq_bytes.copy_from_slice(&buf[3..11]);
    let sequence = u64::from_be_bytes(seq_bytes);
    let epoch = (sequence >> 48) as u16;
    let len = usize::from(u16::from_be_bytes([buf[11], buf[12]]));

    let total = DATAGRAM_HEADER_LEN + len;
    if !version.is_datagram() || buf.len() < total {
        warn!("dropping garbled datagram");
        return (buf.len(), RecordRead::Discarded);
    }

    if len > OpaqueMessage::MAX_PAYLOAD {
        warn!("dropping oversized datagram record of {} bytes", len);
        return (total, RecordRead::Discarded);
    }

    let current_epoch = seqs
        .as_ref()
        .map(|s| s.current_read_epoch())
        .unwrap_or(0);

    if let Some(seqs) = &seqs {
        if seqs.already_seen(sequence) {
            trace!("dropping replayed datagram record {:#x}", sequence);
            return (total, RecordRead::Discarded);
        }
    }

    let opaque = OpaqueMessage {
        typ,
        version,
        payload: Payload::new(&buf[DATAGRAM_HEADER_LEN..total]),
    };

    let plain = if epoch == current_epoch {
        match cipher {
            Some(cipher) => match cipher.decrypt(opaque, sequence) {
                Ok(plain) => plain,
                Err(err) => {
                    warn!("dropping undecryptable datagram record: {}", err);
                    return (total, RecordRead::Discarded);
                }
            },
            None => opaque.into_plain_message(),
        }
    } else if epoch == 0 && typ == ContentType::Handshake {
        // A retransmitted flight from before the cipher change.
        opaque.into_plain_message()
    } else {
        trace!(
            "dropping datagram record from epoch {} (current {})",
            epoch,
            current_epoch
        );
        return (total, RecordRead::Discarded);
    };

    if let Some(seqs) = seqs {
        seqs.read_accept(sequence);
    }

    trace!(
        "read {:?} datagram record, epoch {}, {} bytes, seq {:#x}",
        plain.typ,
        epoch,
        plain.payload.0.len(),
        sequence
    );

    (
        total,
        RecordRead::Record(Record {
            typ: plain.typ,
            version: plain.version,
            sequence,
            payload: plain.payload.0,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::{MessageDecrypter, MessageEncrypter};
    use crate::msgs::message::PlainMessage;

    fn put_datagram_sequence(epoch: u16, seq: u64) -> u64 {
        (u64::from(epoch) << 48) | seq
    }

    struct Xor;

    impl MessageEncrypter for Xor {
        fn encrypt(&mut self, m: BorrowedPlainMessage, seq: u64) -> Result<OpaqueMessage, Error> {
            let mut payload: Vec<u8> = m.payload.iter().map(|b| b ^ 0x55).collect();
            payload.push(seq as u8);
            Ok(OpaqueMessage {
                typ: m.typ,
                version: m.version,
                payload: Payload::new(payload),
            })
        }
    }

    impl MessageDecrypter for Xor {
        fn decrypt(&mut self, m: OpaqueMessage, seq: u64) -> Result<PlainMessage, Error> {
            let mut payload = m.payload.0;
            match payload.pop() {
                Some(tag) if tag == seq as u8 => {}
                _ => return Err(Error::DecryptError),
            }
            Ok(PlainMessage {
                typ: m.typ,
                version: m.version,
                payload: Payload::new(
                    payload
                        .iter()
                        .map(|b| b ^ 0x55)
                        .collect::<Vec<u8>>(),
                ),
            })
        }
    }

    fn writer() -> ConnectionCipherState {
        ConnectionCipherState::with_encrypter(Box::new(Xor))
    }

    fn reader() -> ConnectionCipherState {
        ConnectionCipherState::with_decrypter(Box::new(Xor))
    }

    fn app_data(version: ProtocolVersion, payload: &[u8]) -> BorrowedPlainMessage<'_> {
        BorrowedPlainMessage {
            typ: ContentType::ApplicationData,
            version,
            payload,
        }
    }

    #[test]
    fn stream_header_layout() {
        let mut out = Vec::new();
        write_record(&mut out, app_data(ProtocolVersion::TLSv1_2, b"abc"), 0, None).unwrap();
        assert_eq!(out, vec![0x17, 0x03, 0x03, 0x00, 0x03, b'a', b'b', b'c']);
    }

    #[test]
    fn datagram_header_carries_epoch_and_sequence() {
        let mut out = Vec::new();
        let seq = put_datagram_sequence(1, 5);
        write_record(&mut out, app_data(ProtocolVersion::DTLSv1_2, b"a"), seq, None).unwrap();
        assert_eq!(
            out,
            vec![0x17, 0xfe, 0xfd, 0, 1, 0, 0, 0, 0, 0, 5, 0, 1, b'a']
        );
    }

    #[test]
    fn short_header_needs_more() {
        let (used, read) = read_record(&[0x16, 0x03], None, None).unwrap();
        assert_eq!(used, 0);
        assert!(matches!(read, RecordRead::NeedMore(3)));
    }

    #[test]
    fn partial_encrypted_record_needs_more_and_consumes_nothing() {
        let mut buf = vec![0x17, 0x03, 0x03, 0x00, 50];
        buf.extend_from_slice(&[0u8; 40]);

        let mut seqs = SequenceNumbers::new(false);
        let mut cipher = reader();
        let (used, read) = read_record(&buf, Some(&mut seqs), Some(&mut cipher)).unwrap();
        assert_eq!(used, 0);
        assert!(matches!(read, RecordRead::NeedMore(10)));
        assert_eq!(seqs.next_read_sequence().unwrap(), 0);
    }

    #[test]
    fn stops_at_record_boundary() {
        let mut buf = Vec::new();
        write_record(&mut buf, app_data(ProtocolVersion::TLSv1_2, b"one"), 0, None).unwrap();
        write_record(&mut buf, app_data(ProtocolVersion::TLSv1_2, b"two"), 0, None).unwrap();

        let (used, read) = read_record(&buf, None, None).unwrap();
        assert_eq!(used, 8);
        match read {
            RecordRead::Record(r) => assert_eq!(r.payload, b"one"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn encrypted_stream_records_use_consecutive_sequences() {
        let mut out = Vec::new();
        let mut enc = writer();
        for seq in 0..3 {
            write_record(
                &mut out,
                app_data(ProtocolVersion::TLSv1_2, b"data"),
                seq,
                Some(&mut enc),
            )
            .unwrap();
        }

        let mut seqs = SequenceNumbers::new(false);
        let mut dec = reader();
        let mut offs = 0;
        for expect in 0..3u64 {
            let (used, read) = read_record(&out[offs..], Some(&mut seqs), Some(&mut dec)).unwrap();
            offs += used;
            match read {
                RecordRead::Record(r) => {
                    assert_eq!(r.sequence, expect);
                    assert_eq!(r.payload, b"data");
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(offs, out.len());
    }

    #[test]
    fn stream_authentication_failure_is_fatal() {
        let mut out = Vec::new();
        let mut enc = writer();
        write_record(&mut out, app_data(ProtocolVersion::TLSv1_2, b"hi"), 9, Some(&mut enc)).unwrap();

        let mut seqs = SequenceNumbers::new(false);
        let mut dec = reader();
        assert_eq!(
            read_record(&out, Some(&mut seqs), Some(&mut dec)).unwrap_err(),
            Error::DecryptError
        );
    }

    #[test]
    fn stream_rejects_bad_headers() {
        assert_eq!(
            read_record(&[0x17, 0x04, 0x00, 0x00, 0x01, 0], None, None).unwrap_err(),
            Error::InvalidMessage(InvalidMessage::UnknownProtocolVersion)
        );
        assert_eq!(
            read_record(&[0x17, 0x03, 0x03, 0xff, 0xff], None, None).unwrap_err(),
            Error::PeerSentOversizedRecord
        );
        assert_eq!(
            read_record(&[0x16, 0x03, 0x03, 0x00, 0x00], None, None).unwrap_err(),
            Error::InvalidMessage(InvalidMessage::InvalidEmptyPayload)
        );
    }

    #[test]
    fn datagram_replay_is_discarded() {
        let mut out = Vec::new();
        write_record(
            &mut out,
            BorrowedPlainMessage {
                typ: ContentType::Handshake,
                version: ProtocolVersion::DTLSv1_2,
                payload: b"hs",
            },
            put_datagram_sequence(0, 3),
            None,
        )
        .unwrap();

        let mut seqs = SequenceNumbers::new(true);
        let (used, read) = read_record(&out, Some(&mut seqs), None).unwrap();
        assert_eq!(used, out.len());
        assert!(matches!(read, RecordRead::Record(_)));

        let (used, read) = read_record(&out, Some(&mut seqs), None).unwrap();
        assert_eq!(used, out.len());
        assert!(matches!(read, RecordRead::Discarded));
    }

    #[test]
    fn datagram_forgery_is_discarded_and_not_marked_seen() {
        let mut seqs = SequenceNumbers::new(true);
        seqs.new_read_cipher_state().unwrap();
        let mut good = Vec::new();
        let mut enc = writer();
        write_record(
            &mut good,
            app_data(ProtocolVersion::DTLSv1_2, b"x"),
            put_datagram_sequence(1, 0),
            Some(&mut enc),
        )
        .unwrap();

        let mut forged = good.clone();
        // corrupt the trailing tag
        if let Some(last) = forged.last_mut() {
            *last ^= 0xff;
        }

        let mut dec = reader();
        let (_, read) = read_record(&forged, Some(&mut seqs), Some(&mut dec)).unwrap();
        assert!(matches!(read, RecordRead::Discarded));

        let (_, read) = read_record(&good, Some(&mut seqs), Some(&mut dec)).unwrap();
        assert!(matches!(read, RecordRead::Record(_)));
    }

    #[test]
    fn datagram_from_other_epoch_is_discarded() {
        let mut out = Vec::new();
        write_record(
            &mut out,
            app_data(ProtocolVersion::DTLSv1_2, b"late"),
            put_datagram_sequence(2, 0),
            None,
        )
        .unwrap();

        let mut seqs = SequenceNumbers::new(true);
        seqs.new_read_cipher_state().unwrap();
        let (used, read) = read_record(&out, Some(&mut seqs), None).unwrap();
        assert_eq!(used, out.len());
        assert!(matches!(read, RecordRead::Discarded));
    }

    #[test]
    fn truncated_datagram_is_discarded_entirely() {
        let (used, read) = read_record(&[0x16, 0xfe, 0xfd, 0, 0], None, None).unwrap();
        assert_eq!(used, 5);
        assert!(matches!(read, RecordRead::Discarded));
    }
}
