//! Handshake message transport.
//!
//! Stream transports deliver records reliably and in order, so handshake
//! messages only need joining across record boundaries.  Datagram
//! transports may lose, duplicate or reorder records: messages are
//! fragmented to fit the path MTU, reassembled by `message_seq`, and each
//! flight we send is kept for retransmission until the peer answers it.

use crate::enums::{ContentType, HandshakeType};
use crate::error::{Error, InvalidMessage, PeerMisbehaved};
use crate::log::{debug, trace, warn};
use crate::msgs::ccs::ChangeCipherSpecPayload;
use crate::msgs::codec::{u24, Codec, Reader};

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

/// Length of a stream handshake header: type and u24 length.
const STREAM_HEADER_LEN: usize = 1 + 3;

/// Length of a datagram handshake header: type, u24 length, u16
/// message_seq, u24 fragment_offset and u24 fragment_length.
const DATAGRAM_HEADER_LEN: usize = 1 + 3 + 2 + 3 + 3;

/// Handshake messages larger than this are refused.
const MAX_HANDSHAKE_SIZE: usize = 0xffff;

/// Datagrams we build are at most this long.
pub(crate) const DATAGRAM_MTU: usize = 1400;

/// Room left in each datagram for the record header and cipher overhead.
const DATAGRAM_RECORD_OVERHEAD: usize = 13 + 64;

/// Messages this far ahead of the next expected `message_seq` are dropped.
const MAX_FUTURE_MESSAGES: u16 = 16;

const INITIAL_RETRANSMIT_TIMEOUT: Duration = Duration::from_secs(1);
const MAX_RETRANSMIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Something reassembled from handshake-layer records.
#[derive(Debug, PartialEq)]
pub(crate) enum HandshakeFrame {
    ChangeCipherSpec,
    Message(HandshakeMessage),
}

/// One complete handshake message.
#[derive(Debug, PartialEq)]
pub(crate) struct HandshakeMessage {
    pub(crate) typ: HandshakeType,
    pub(crate) body: Vec<u8>,
    /// The message as it enters the transcript hash, header included.
    pub(crate) encoded: Vec<u8>,
}

/// A record the handshake layer wants written, and the write epoch it
/// belongs to.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct OutgoingRecord {
    pub(crate) typ: ContentType,
    pub(crate) epoch: u16,
    pub(crate) payload: Vec<u8>,
}

/// The transport half of a handshake.
pub(crate) trait HandshakeIo: Send {
    /// Take the payload of one Handshake or ChangeCipherSpec record,
    /// read under `epoch`.
    fn add_record(&mut self, typ: ContentType, payload: &[u8], epoch: u16) -> Result<(), Error>;

    /// The next complete handshake frame, if there is one.
    /// `expecting_ccs` says whether the state machine is waiting for a
    /// ChangeCipherSpec rather than a handshake message.
    fn next_message(&mut self, expecting_ccs: bool) -> Option<HandshakeFrame>;

    /// Frame a handshake message for sending under `epoch`.  Records hold
    /// at most `max_record` bytes of payload.
    ///
    /// Returns the records to write and the message's transcript encoding.
    fn send_message(
        &mut self,
        typ: HandshakeType,
        body: &[u8],
        epoch: u16,
        max_record: usize,
    ) -> (Vec<OutgoingRecord>, Vec<u8>);

    /// Frame a ChangeCipherSpec for sending under `epoch`.
    fn send_change_cipher_spec(&mut self, epoch: u16) -> Vec<OutgoingRecord>;

    /// Records to send again because the peer repeated its last flight.
    fn take_retransmission(&mut self) -> Vec<OutgoingRecord> {
        Vec::new()
    }

    /// Drive the retransmission timer.  Returns the records to send again
    /// when it has expired.
    fn timeout_check(&mut self, _now: Instant) -> Vec<OutgoingRecord> {
        Vec::new()
    }
}

/// The TLS handshake layer: messages are joined from, and split into,
/// in-order records.
pub(crate) struct StreamHandshakeIo {
    buf: Vec<u8>,
    frames: VecDeque<HandshakeFrame>,
}

impl StreamHandshakeIo {
    pub(crate) fn new() -> Self {
        Self {
            buf: Vec::new(),
            frames: VecDeque::new(),
        }
    }

    /// Does `buf` hold a complete message?
    fn buf_contains_message(&self) -> Result<bool, Error> {
        if self.buf.len() < STREAM_HEADER_LEN {
            return Ok(false);
        }

        let len = u24::decode(&self.buf[1..STREAM_HEADER_LEN])
            .map(usize::from)
            .ok_or(InvalidMessage::MessageTooShort)?;
        if len > MAX_HANDSHAKE_SIZE {
            return Err(InvalidMessage::HandshakePayloadTooLarge.into());
        }

        Ok(self.buf.len() >= STREAM_HEADER_LEN + len)
    }

    fn deframe_one(&mut self) -> Result<(), Error> {
        let mut rd = Reader::init(&self.buf);
        let typ = HandshakeType::read(&mut rd)?;
        let len = usize::from(u24::read(&mut rd)?);
        let body = rd
            .take(len)
            .ok_or(InvalidMessage::MessageTooShort)?
            .to_vec();
        let used = rd.used();

        let encoded = self.buf.drain(..used).collect();
        self.frames
            .push_back(HandshakeFrame::Message(HandshakeMessage {
                typ,
                body,
                encoded,
            }));
        Ok(())
    }
}

impl HandshakeIo for StreamHandshakeIo {
    fn add_record(&mut self, typ: ContentType, payload: &[u8], _epoch: u16) -> Result<(), Error> {
        match typ {
            ContentType::Handshake => {
                self.buf.extend_from_slice(payload);
                while self.buf_contains_message()? {
                    self.deframe_one()?;
                }
                Ok(())
            }
            ContentType::ChangeCipherSpec => {
                ChangeCipherSpecPayload::read_bytes(payload)?;
                // a key change must fall on a message boundary
                if !self.buf.is_empty() {
                    return Err(PeerMisbehaved::KeyEpochWithPendingFragment.into());
                }
                self.frames
                    .push_back(HandshakeFrame::ChangeCipherSpec);
                Ok(())
            }
            _ => Err(Error::InappropriateMessage {
                expect_types: vec![ContentType::Handshake, ContentType::ChangeCipherSpec],
                got_type: typ,
            }),
        }
    }

    fn next_message(&mut self, _expecting_ccs: bool) -> Option<HandshakeFrame> {
        self.frames.pop_front()
    }

    fn send_message(
        &mut self,
        typ: HandshakeType,
        body: &[u8],
        epoch: u16,
        _max_record: usize,
    ) -> (Vec<OutgoingRecord>, Vec<u8>) {
        let mut encoded = Vec::with_capacity(STREAM_HEADER_LEN + body.len());
        typ.encode(&mut encoded);
        u24(body.len() as u32).encode(&mut encoded);
        encoded.extend_from_slice(body);

        // the channel's fragmenter splits this if need be
        let record = OutgoingRecord {
            typ: ContentType::Handshake,
            epoch,
            payload: encoded.clone(),
        };
        (vec![record], encoded)
    }

    fn send_change_cipher_spec(&mut self, epoch: u16) -> Vec<OutgoingRecord> {
        vec![OutgoingRecord {
            typ: ContentType::ChangeCipherSpec,
            epoch,
            payload: ChangeCipherSpecPayload.get_encoding(),
        }]
    }
}

/// A message being reassembled from datagram fragments.
struct PartialMessage {
    typ: HandshakeType,
    body: Vec<u8>,
    have: Vec<bool>,
    missing: usize,
}

impl PartialMessage {
    fn new(typ: HandshakeType, len: usize) -> Self {
        Self {
            typ,
            body: vec![0u8; len],
            have: vec![false; len],
            missing: len,
        }
    }

    fn add_fragment(
        &mut self,
        typ: HandshakeType,
        len: usize,
        offset: usize,
        fragment: &[u8],
    ) -> Result<(), InvalidMessage> {
        if typ != self.typ || len != self.body.len() || offset + fragment.len() > len {
            return Err(InvalidMessage::InconsistentFragment);
        }

        for (i, byte) in fragment.iter().enumerate() {
            let at = offset + i;
            if self.have[at] {
                if self.body[at] != *byte {
                    return Err(InvalidMessage::InconsistentFragment);
                }
                continue;
            }
            self.body[at] = *byte;
            self.have[at] = true;
            self.missing -= 1;
        }
        Ok(())
    }

    fn is_complete(&self) -> bool {
        self.missing == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Timer {
    /// Not running: nothing sent, or the peer has answered.
    Disabled,
    /// To be armed on the next timeout check.
    Unarmed,
    Armed(Instant),
}

/// The DTLS handshake layer.
pub(crate) struct DatagramHandshakeIo {
    messages: BTreeMap<u16, PartialMessage>,
    in_message_seq: u16,
    out_message_seq: u16,
    /// The epoch current records are read under.  It advances once a
    /// received ChangeCipherSpec is handed out.
    read_epoch: u16,

    /// Epoch of a received ChangeCipherSpec not yet handed out.
    ccs_epoch: Option<u16>,
    ccs_delivered: bool,

    /// Our last flight, kept for retransmission.
    flight: Vec<OutgoingRecord>,
    /// Set once the peer has started answering `flight`; the next
    /// message we send begins a new flight.
    flight_answered: bool,
    resend_requested: bool,
    timer: Timer,
    rto: Duration,
}

impl DatagramHandshakeIo {
    pub(crate) fn new(read_epoch: u16) -> Self {
        Self {
            messages: BTreeMap::new(),
            in_message_seq: 0,
            out_message_seq: 0,
            read_epoch,
            ccs_epoch: None,
            ccs_delivered: false,
            flight: Vec::new(),
            flight_answered: true,
            resend_requested: false,
            timer: Timer::Disabled,
            rto: INITIAL_RETRANSMIT_TIMEOUT,
        }
    }

    fn flight_begin(&mut self) {
        debug!("beginning new handshake flight");
        self.flight.clear();
        self.flight_answered = false;
        self.rto = INITIAL_RETRANSMIT_TIMEOUT;
        self.timer = Timer::Unarmed;
    }

    fn flight_push(&mut self, record: OutgoingRecord) {
        if self.flight_answered {
            self.flight_begin();
        }
        self.flight.push(record);
    }

    /// The peer has moved on to its next flight, which answers ours.
    fn flight_stop_resend_timer(&mut self) {
        if !self.flight_answered {
            trace!("peer answered our flight");
        }
        self.flight_answered = true;
        self.timer = Timer::Disabled;
    }

    /// The peer sent its previous flight again: ours was lost.  A flight
    /// the peer already answered is not resent.
    fn peer_repeated_flight(&mut self) {
        if !self.flight.is_empty() && !self.flight_answered {
            debug!("peer retransmitted its flight; will resend ours");
            self.resend_requested = true;
        }
    }

    /// A record from an epoch other than the one we read under.  It is
    /// never reassembled: at most it shows the peer repeating its flight.
    fn add_stale_record(&mut self, typ: ContentType, payload: &[u8], epoch: u16) {
        let repeated = epoch < self.read_epoch
            && match typ {
                ContentType::ChangeCipherSpec => self.ccs_delivered,
                ContentType::Handshake => payload
                    .get(4..6)
                    .map(|seq| u16::from_be_bytes([seq[0], seq[1]]) < self.in_message_seq)
                    .unwrap_or(false),
                _ => false,
            };

        match repeated {
            true => self.peer_repeated_flight(),
            false => trace!(
                "dropping {:?} record from epoch {} (reading {})",
                typ,
                epoch,
                self.read_epoch
            ),
        }
    }

    fn add_fragment(&mut self, r: &mut Reader) -> Result<(), Error> {
        let typ = HandshakeType::read(r)?;
        let len = usize::from(u24::read(r)?);
        let message_seq = u16::read(r)?;
        let offset = usize::from(u24::read(r)?);
        let frag_len = usize::from(u24::read(r)?);
        let fragment = r
            .take(frag_len)
            .ok_or(InvalidMessage::MessageTooShort)?;

        if len > MAX_HANDSHAKE_SIZE {
            return Err(InvalidMessage::HandshakePayloadTooLarge.into());
        }

        if message_seq < self.in_message_seq {
            self.peer_repeated_flight();
            return Ok(());
        }

        if message_seq - self.in_message_seq >= MAX_FUTURE_MESSAGES {
            warn!("dropping handshake fragment with message_seq {}", message_seq);
            return Ok(());
        }

        self.flight_stop_resend_timer();
        self.messages
            .entry(message_seq)
            .or_insert_with(|| PartialMessage::new(typ, len))
            .add_fragment(typ, len, offset, fragment)?;
        Ok(())
    }

    fn encode_header(
        out: &mut Vec<u8>,
        typ: HandshakeType,
        len: usize,
        message_seq: u16,
        offset: usize,
        frag_len: usize,
    ) {
        typ.encode(out);
        u24(len as u32).encode(out);
        message_seq.encode(out);
        u24(offset as u32).encode(out);
        u24(frag_len as u32).encode(out);
    }
}

impl HandshakeIo for DatagramHandshakeIo {
    fn add_record(&mut self, typ: ContentType, payload: &[u8], epoch: u16) -> Result<(), Error> {
        if epoch != self.read_epoch {
            self.add_stale_record(typ, payload, epoch);
            return Ok(());
        }

        match typ {
            ContentType::Handshake => {
                let mut r = Reader::init(payload);
                while r.any_left() {
                    self.add_fragment(&mut r)?;
                }
                Ok(())
            }
            ContentType::ChangeCipherSpec => {
                ChangeCipherSpecPayload::read_bytes(payload)?;
                match self.ccs_epoch {
                    Some(_) if self.ccs_delivered => self.peer_repeated_flight(),
                    Some(_) => {}
                    None => {
                        self.flight_stop_resend_timer();
                        self.ccs_epoch = Some(epoch);
                    }
                }
                Ok(())
            }
            _ => Err(Error::InappropriateMessage {
                expect_types: vec![ContentType::Handshake, ContentType::ChangeCipherSpec],
                got_type: typ,
            }),
        }
    }

    fn next_message(&mut self, expecting_ccs: bool) -> Option<HandshakeFrame> {
        if expecting_ccs {
            return match self.ccs_epoch {
                Some(epoch) if !self.ccs_delivered => {
                    self.ccs_delivered = true;
                    self.read_epoch = epoch.saturating_add(1);
                    Some(HandshakeFrame::ChangeCipherSpec)
                }
                _ => None,
            };
        }

        if !self
            .messages
            .get(&self.in_message_seq)?
            .is_complete()
        {
            return None;
        }

        let message_seq = self.in_message_seq;
        let msg = self.messages.remove(&message_seq)?;
        self.in_message_seq += 1;

        // the transcript sees each message as a single unfragmented piece
        let mut encoded = Vec::with_capacity(DATAGRAM_HEADER_LEN + msg.body.len());
        Self::encode_header(
            &mut encoded,
            msg.typ,
            msg.body.len(),
            message_seq,
            0,
            msg.body.len(),
        );
        encoded.extend_from_slice(&msg.body);

        Some(HandshakeFrame::Message(HandshakeMessage {
            typ: msg.typ,
            body: msg.body,
            encoded,
        }))
    }

    fn send_message(
        &mut self,
        typ: HandshakeType,
        body: &[u8],
        epoch: u16,
        max_record: usize,
    ) -> (Vec<OutgoingRecord>, Vec<u8>) {
        let message_seq = self.out_message_seq;
        self.out_message_seq += 1;

        let max_fragment = max_record
            .min(DATAGRAM_MTU - DATAGRAM_RECORD_OVERHEAD)
            .saturating_sub(DATAGRAM_HEADER_LEN)
            .max(1);

        let mut records = Vec::new();
        let mut offset = 0;
        loop {
            let frag_len = max_fragment.min(body.len() - offset);
            let mut payload = Vec::with_capacity(DATAGRAM_HEADER_LEN + frag_len);
            Self::encode_header(&mut payload, typ, body.len(), message_seq, offset, frag_len);
            payload.extend_from_slice(&body[offset..offset + frag_len]);

            let record = OutgoingRecord {
                typ: ContentType::Handshake,
                epoch,
                payload,
            };
            self.flight_push(record.clone());
            records.push(record);

            offset += frag_len;
            if offset >= body.len() {
                break;
            }
        }

        let mut encoded = Vec::with_capacity(DATAGRAM_HEADER_LEN + body.len());
        Self::encode_header(&mut encoded, typ, body.len(), message_seq, 0, body.len());
        encoded.extend_from_slice(body);

        (records, encoded)
    }

    fn send_change_cipher_spec(&mut self, epoch: u16) -> Vec<OutgoingRecord> {
        let record = OutgoingRecord {
            typ: ContentType::ChangeCipherSpec,
            epoch,
            payload: ChangeCipherSpecPayload.get_encoding(),
        };
        self.flight_push(record.clone());
        vec![record]
    }

    fn take_retransmission(&mut self) -> Vec<OutgoingRecord> {
        match std::mem::take(&mut self.resend_requested) {
            true => self.flight.clone(),
            false => Vec::new(),
        }
    }

    fn timeout_check(&mut self, now: Instant) -> Vec<OutgoingRecord> {
        match self.timer {
            Timer::Disabled => Vec::new(),
            Timer::Unarmed => {
                self.timer = Timer::Armed(now + self.rto);
                Vec::new()
            }
            Timer::Armed(deadline) if now >= deadline => {
                self.rto = (self.rto * 2).min(MAX_RETRANSMIT_TIMEOUT);
                debug!(
                    "handshake flight timed out; resending, next timeout in {:?}",
                    self.rto
                );
                self.timer = Timer::Armed(now + self.rto);
                self.flight.clone()
            }
            Timer::Armed(_) => Vec::new(),
        }
    }
}
