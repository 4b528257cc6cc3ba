use crate::cipher::ConnectionCipherState;
use crate::client::{self, ClientConfig};
use crate::enums::{
    AlertDescription, CipherSuite, ContentType, HandshakeType, ProtocolVersion, Side,
};
use crate::error::{Error, PeerMisbehaved};
use crate::handshake::io::{
    DatagramHandshakeIo, HandshakeFrame, HandshakeIo, OutgoingRecord, StreamHandshakeIo,
};
use crate::handshake::{HandshakeState, Incoming};
use crate::log::{debug, error, trace, warn};
use crate::msgs::alert::Alert;
use crate::msgs::codec::Codec;
use crate::msgs::enums::{Compression, HeartbeatMessageType, HeartbeatMode};
use crate::msgs::fragmenter::MessageFragmenter;
use crate::msgs::handshake::{
    ClientHelloPayload, HandshakeMessagePayload, HandshakePayload, HasHelloExtensions,
    ServerHelloPayload,
};
use crate::msgs::heartbeat::{HeartbeatPayload, MIN_PADDING};
use crate::msgs::message::BorrowedPlainMessage;
use crate::msgs::record::{self, Record, RecordRead};
use crate::rand;
use crate::seq_numbers::SequenceNumbers;
use crate::server::{self, ServerConfig};
use crate::session::{Session, SessionStore};

use subtle::ConstantTimeEq;

use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Something the channel hands to the application.
#[derive(Debug, PartialEq)]
pub enum Event<'a> {
    /// Decrypted application data, one non-empty record at a time.
    ApplicationData(&'a [u8]),
    /// An alert the peer sent.
    Alert(Alert),
    /// The payload echoed by the peer in answer to our heartbeat request.
    HeartbeatResponse(&'a [u8]),
}

/// The application's side of a [`Channel`].
///
/// A channel never does IO itself: everything it wants written goes to
/// `emit`, and everything it has for the application goes to `deliver`.
pub trait Callbacks: Send {
    /// Write these bytes to the transport.  Each call is exactly one
    /// record, so datagram transports can send one datagram per call.
    fn emit(&mut self, data: &[u8]);

    /// Take application data, alerts and heartbeat responses.
    fn deliver(&mut self, event: Event<'_>);

    /// Approve a freshly negotiated session.  Returning false aborts the
    /// handshake with a `handshake_failure` alert.
    fn handshake_complete(&mut self, session: &Session) -> bool;
}

#[derive(Clone)]
pub(crate) enum SideConfig {
    Client(Arc<ClientConfig>),
    Server(Arc<ServerConfig>),
}

impl SideConfig {
    fn side(&self) -> Side {
        match self {
            Self::Client(_) => Side::Client,
            Self::Server(_) => Side::Server,
        }
    }

    fn session_store(&self) -> Arc<dyn SessionStore> {
        match self {
            Self::Client(config) => Arc::clone(&config.session_storage),
            Self::Server(config) => Arc::clone(&config.session_storage),
        }
    }
}

#[derive(Debug, PartialEq)]
enum Flow {
    Continue,
    /// A fatal alert ended the connection; remaining input is dropped.
    Closed,
}

/// A TLS 1.2 or DTLS 1.2 connection, driven entirely by the application.
///
/// Received bytes go in through [`Channel::received_data`], plaintext
/// through [`Channel::send`]; records come out through
/// [`Callbacks::emit`].  At most one established (active) session and one
/// in-progress (pending) handshake exist at a time, so renegotiation runs
/// under the keys of the connection it replaces.
pub struct Channel {
    side: SideConfig,
    callbacks: Box<dyn Callbacks>,
    active_state: Option<HandshakeState>,
    pending_state: Option<HandshakeState>,
    read_cipher_state: Option<ConnectionCipherState>,
    write_cipher_state: Option<ConnectionCipherState>,
    /// The write state of the previous epoch, kept so a datagram flight
    /// that straddles a ChangeCipherSpec can be retransmitted.
    previous_write_cipher_state: Option<ConnectionCipherState>,
    sequence_numbers: Option<SequenceNumbers>,
    fragmenter: MessageFragmenter,
    connection_closed: bool,
    /// Why the peer closed the connection, if it did so with a fatal alert.
    peer_fatal_alert: Option<AlertDescription>,
    readbuf: Vec<u8>,
    writebuf: Vec<u8>,
}

impl Channel {
    fn new(side: SideConfig, callbacks: Box<dyn Callbacks>) -> Self {
        Self {
            side,
            callbacks,
            active_state: None,
            pending_state: None,
            read_cipher_state: None,
            write_cipher_state: None,
            previous_write_cipher_state: None,
            sequence_numbers: None,
            fragmenter: MessageFragmenter::default(),
            connection_closed: false,
            peer_fatal_alert: None,
            readbuf: Vec::new(),
            writebuf: Vec::new(),
        }
    }

    /// Make a client connection and emit its first ClientHello.
    ///
    /// `version` picks the transport: [`ProtocolVersion::TLSv1_2`] for
    /// streams or [`ProtocolVersion::DTLSv1_2`] for datagrams.
    pub fn new_client(
        config: Arc<ClientConfig>,
        callbacks: Box<dyn Callbacks>,
        version: ProtocolVersion,
    ) -> Result<Self, Error> {
        if !matches!(
            version,
            ProtocolVersion::TLSv1_2 | ProtocolVersion::DTLSv1_2
        ) {
            return Err(Error::General(format!(
                "cannot start a client handshake for {:?}",
                version
            )));
        }

        let mut channel = Self::new(SideConfig::Client(config), callbacks);
        channel.create_handshake_state(version)?;
        channel.initiate_handshake(false)?;
        Ok(channel)
    }

    /// Make a server connection.  Nothing is sent until the client's
    /// first record arrives; that record also decides the transport.
    pub fn new_server(config: Arc<ServerConfig>, callbacks: Box<dyn Callbacks>) -> Self {
        Self::new(SideConfig::Server(config), callbacks)
    }

    /// Process bytes received from the transport.  For datagram
    /// transports, each call must carry whole datagrams.
    ///
    /// Returns the number of further bytes needed to complete the record
    /// in progress, zero when the input ended on a record boundary.
    ///
    /// On error the matching fatal alert has already been sent and the
    /// connection is closed.
    pub fn received_data(&mut self, data: &[u8]) -> Result<usize, Error> {
        match self.process_received(data) {
            Ok(needed) => Ok(needed),
            Err(err) => {
                self.readbuf.clear();
                if let Some(description) = err.fatal_alert() {
                    error!("sending fatal alert {:?}: {}", description, err);
                    self.send_fatal_alert(description);
                }
                Err(err)
            }
        }
    }

    fn process_received(&mut self, data: &[u8]) -> Result<usize, Error> {
        self.readbuf.extend_from_slice(data);

        while !self.readbuf.is_empty() {
            let (consumed, read) = record::read_record(
                &self.readbuf,
                self.sequence_numbers.as_mut(),
                self.read_cipher_state.as_mut(),
            )?;
            self.readbuf.drain(..consumed);

            match read {
                RecordRead::NeedMore(needed) => return Ok(needed),
                RecordRead::Discarded => {}
                RecordRead::Record(record) => {
                    if self.process_record(record)? == Flow::Closed {
                        self.readbuf.clear();
                        return Ok(0);
                    }
                }
            }
        }

        Ok(0)
    }

    fn process_record(&mut self, record: Record) -> Result<Flow, Error> {
        if self.connection_closed && record.typ != ContentType::Alert {
            debug!(
                "discarding {:?} record received after close",
                record.typ
            );
            return Ok(Flow::Continue);
        }

        if record.payload.len() > self.fragmenter.max_fragment_size() {
            return Err(Error::PeerSentOversizedRecord);
        }

        match record.typ {
            ContentType::Handshake | ContentType::ChangeCipherSpec => {
                self.process_handshake_record(record)?;
            }
            ContentType::Heartbeat if self.peer_supports_heartbeats() => {
                self.process_heartbeat(&record.payload)?;
            }
            ContentType::ApplicationData => {
                if self.active_state.is_none() {
                    return Err(Error::InappropriateMessage {
                        expect_types: vec![
                            ContentType::Handshake,
                            ContentType::ChangeCipherSpec,
                            ContentType::Alert,
                        ],
                        got_type: ContentType::ApplicationData,
                    });
                }
                if !record.payload.is_empty() {
                    self.callbacks
                        .deliver(Event::ApplicationData(&record.payload));
                }
            }
            ContentType::Alert => return self.process_alert(&record.payload),
            typ => {
                return Err(Error::InappropriateMessage {
                    expect_types: vec![
                        ContentType::Handshake,
                        ContentType::ChangeCipherSpec,
                        ContentType::Alert,
                        ContentType::ApplicationData,
                    ],
                    got_type: typ,
                });
            }
        }

        Ok(Flow::Continue)
    }

    fn process_handshake_record(&mut self, record: Record) -> Result<(), Error> {
        if self.pending_state.is_some() && !self.in_current_read_epoch(&record) {
            // unprotected leftovers of an earlier flight, or forgeries
            trace!(
                "dropping {:?} record from epoch {} during handshake",
                record.typ,
                record.epoch()
            );
            return Ok(());
        }

        if self.pending_state.is_none() {
            if !self.starts_handshake(&record) {
                return self.process_stray_handshake_record(&record);
            }

            self.create_handshake_state(record.version)?;
            if let Some(seqs) = self.sequence_numbers.as_mut() {
                seqs.read_accept(record.sequence);
            }
        }

        let pending = self.pending_mut()?;
        pending
            .io
            .add_record(record.typ, &record.payload, record.epoch())?;
        let resend = pending.io.take_retransmission();
        self.send_outgoing(resend)?;

        while let Some(frame) = self.next_handshake_frame() {
            self.process_handshake_msg(Incoming::parse(frame)?)?;
        }

        Ok(())
    }

    /// Whether `record`, arriving with no handshake pending, begins one.
    ///
    /// On streams anything handshake-layer does.  On datagrams only the
    /// first fragment of an initial message (a ClientHello for servers, a
    /// HelloRequest for clients) in the current read epoch does; other
    /// records are retransmissions of the handshake that just finished.
    fn starts_handshake(&self, record: &Record) -> bool {
        let datagram = self
            .sequence_numbers
            .as_ref()
            .map(|seqs| seqs.is_datagram())
            .unwrap_or_else(|| record.version.is_datagram());
        if !datagram {
            return true;
        }

        let read_epoch = self
            .sequence_numbers
            .as_ref()
            .map(|seqs| seqs.current_read_epoch())
            .unwrap_or(0);
        let initial = match self.side.side() {
            Side::Client => HandshakeType::HelloRequest,
            Side::Server => HandshakeType::ClientHello,
        };

        record.typ == ContentType::Handshake
            && record.epoch() == read_epoch
            && record.payload.len() >= 6
            && HandshakeType::from(record.payload[0]) == initial
            && record.payload[4..6] == [0, 0]
    }

    fn in_current_read_epoch(&self, record: &Record) -> bool {
        match &self.sequence_numbers {
            Some(seqs) if seqs.is_datagram() => record.epoch() == seqs.current_read_epoch(),
            _ => true,
        }
    }

    fn process_stray_handshake_record(&mut self, record: &Record) -> Result<(), Error> {
        let active = match self.active_state.as_mut() {
            Some(active) => active,
            None => {
                warn!("dropping {:?} record with no handshake", record.typ);
                return Ok(());
            }
        };

        if let Err(err) = active
            .io
            .add_record(record.typ, &record.payload, record.epoch())
        {
            warn!("dropping stray handshake record: {}", err);
            return Ok(());
        }

        let resend = active.io.take_retransmission();
        self.send_outgoing(resend)
    }

    fn next_handshake_frame(&mut self) -> Option<HandshakeFrame> {
        let pending = self.pending_state.as_mut()?;
        let expecting_ccs = pending.expecting_ccs();
        pending.io.next_message(expecting_ccs)
    }

    /// Feed one reassembled message to the pending handshake.
    ///
    /// If the handler completed or abandoned the handshake the state it
    /// returns has nowhere to go and is dropped.
    pub(crate) fn process_handshake_msg(&mut self, m: Incoming) -> Result<(), Error> {
        let state = self
            .pending_mut()?
            .state
            .take()
            .ok_or_else(|| Error::General("handshake state machine is not ready".into()))?;

        let next = state.handle(self, m)?;

        if let Some(pending) = self.pending_state.as_mut() {
            if pending.state.is_none() {
                pending.state = Some(next);
            }
        }
        Ok(())
    }

    fn process_heartbeat(&mut self, payload: &[u8]) -> Result<(), Error> {
        let heartbeat = match HeartbeatPayload::read_bytes(payload) {
            Ok(heartbeat) => heartbeat,
            Err(err) => {
                warn!("discarding malformed heartbeat: {:?}", err);
                return Ok(());
            }
        };

        match heartbeat.typ {
            HeartbeatMessageType::Request if self.pending_state.is_none() => {
                let padding = rand::random_vec(MIN_PADDING)?;
                let response = HeartbeatPayload::response(heartbeat.payload, padding);
                self.send_record(ContentType::Heartbeat, &response.get_encoding())?;
            }
            HeartbeatMessageType::Request => {
                debug!("ignoring heartbeat request during handshake");
            }
            HeartbeatMessageType::Response => {
                self.callbacks
                    .deliver(Event::HeartbeatResponse(&heartbeat.payload));
            }
            HeartbeatMessageType::Unknown(typ) => {
                warn!("discarding heartbeat of unknown type {}", typ);
            }
        }

        Ok(())
    }

    fn process_alert(&mut self, payload: &[u8]) -> Result<Flow, Error> {
        let alert = Alert::read_bytes(payload)?;

        if alert.is_fatal() {
            error!("received fatal alert {:?}", alert.description);
        } else {
            warn!("received warning alert {:?}", alert.description);
        }

        if alert.description == AlertDescription::NoRenegotiation {
            self.pending_state = None;
        }

        self.callbacks.deliver(Event::Alert(alert));

        if alert.description == AlertDescription::CloseNotify {
            if !self.connection_closed {
                self.send_warning_alert(AlertDescription::CloseNotify);
            }
            self.read_cipher_state = None;
        } else if alert.is_fatal() {
            self.forget_session();
            self.reset_state();
            self.connection_closed = true;
            self.peer_fatal_alert = Some(alert.description);
            return Ok(Flow::Closed);
        }

        Ok(Flow::Continue)
    }

    /// Send application data, split into records of at most the maximum
    /// fragment size.
    pub fn send(&mut self, data: &[u8]) -> Result<(), Error> {
        if self.connection_closed {
            return Err(match self.peer_fatal_alert {
                Some(description) => Error::AlertReceived(description),
                None => Error::ConnectionClosed,
            });
        }
        if self.active_state.is_none() {
            return Err(Error::HandshakeNotComplete);
        }
        self.send_record_array(ContentType::ApplicationData, data)
    }

    /// Send an alert.  Failures to write it are ignored.
    ///
    /// A `no_renegotiation` alert abandons the pending handshake.  A fatal
    /// alert or `close_notify` closes the connection: nothing more is
    /// written, though alerts from the peer are still read.
    pub fn send_alert(&mut self, alert: Alert) {
        if alert.is_valid() && !self.connection_closed {
            if let Err(err) = self.send_record(ContentType::Alert, &alert.get_encoding()) {
                debug!("failed to send alert {:?}: {}", alert.description, err);
            }
        }

        if alert.description == AlertDescription::NoRenegotiation {
            self.pending_state = None;
        }

        if alert.is_fatal() {
            self.forget_session();
        }

        if alert.description == AlertDescription::CloseNotify || alert.is_fatal() {
            self.active_state = None;
            self.pending_state = None;
            self.write_cipher_state = None;
            self.previous_write_cipher_state = None;
            self.connection_closed = true;
        }
    }

    /// Send a warning-level alert.
    pub fn send_warning_alert(&mut self, description: AlertDescription) {
        self.send_alert(Alert::warning(description));
    }

    /// Send a fatal alert, closing the connection.
    pub fn send_fatal_alert(&mut self, description: AlertDescription) {
        self.send_alert(Alert::fatal(description));
    }

    /// Close the connection with a `close_notify`.
    pub fn close(&mut self) {
        self.send_warning_alert(AlertDescription::CloseNotify);
    }

    /// Start a new handshake on an established connection.
    ///
    /// Does nothing if a handshake is already under way.  Sessions are
    /// never resumed, so every handshake is a full one whatever
    /// `force_full` says.
    pub fn renegotiate(&mut self, force_full: bool) -> Result<(), Error> {
        if self.pending_state.is_some() {
            return Ok(());
        }

        let version = self
            .active_state
            .as_ref()
            .map(|active| active.version())
            .ok_or(Error::HandshakeNotComplete)?;

        debug!("renegotiation requested");
        self.create_handshake_state(version)?;
        self.initiate_handshake(force_full)
    }

    fn initiate_handshake(&mut self, force_full: bool) -> Result<(), Error> {
        trace!("initiating handshake, force_full {}", force_full);
        let state = match self.side.clone() {
            SideConfig::Client(config) => client::hs::start_handshake(self, config)?,
            SideConfig::Server(config) => server::hs::request_renegotiation(self, config)?,
        };
        self.pending_mut()?.state = Some(state);
        Ok(())
    }

    /// Send a heartbeat request carrying `payload`.  Does nothing unless
    /// the peer agreed to receive them.
    pub fn heartbeat(&mut self, payload: &[u8]) -> Result<(), Error> {
        if !self.heartbeat_sending_allowed() {
            warn!("peer does not accept heartbeat requests");
            return Ok(());
        }

        let padding = rand::random_vec(MIN_PADDING)?;
        let request = HeartbeatPayload::request(payload, padding).get_encoding();
        let version = self.record_version()?;
        let epoch = self.current_write_epoch();
        self.write_record(
            BorrowedPlainMessage {
                typ: ContentType::Heartbeat,
                version,
                payload: &request,
            },
            epoch,
        )
    }

    /// Whether the peer negotiated the heartbeat extension.
    pub fn peer_supports_heartbeats(&self) -> bool {
        self.active_state
            .as_ref()
            .map(|active| active.peer_heartbeat_mode.is_some())
            .unwrap_or(false)
    }

    /// Whether the peer accepts heartbeat requests from us.
    pub fn heartbeat_sending_allowed(&self) -> bool {
        self.active_state
            .as_ref()
            .and_then(|active| active.peer_heartbeat_mode)
            == Some(HeartbeatMode::PeerAllowedToSend)
    }

    /// Whether the server agreed to secure renegotiation, judged from the
    /// established session or else from the handshake in progress.
    pub fn secure_renegotiation_supported(&self) -> bool {
        if let Some(active) = &self.active_state {
            return active.server_secure_renegotiation();
        }
        self.pending_state
            .as_ref()
            .map(|pending| pending.server_secure_renegotiation())
            .unwrap_or(false)
    }

    /// Set the largest plaintext we put in one record.  Zero means the
    /// protocol maximum of 16384; other values are clamped to
    /// `128..=16384`.
    pub fn set_maximum_fragment_size(&mut self, max_fragment_size: usize) {
        self.fragmenter
            .set_max_fragment_size(max_fragment_size);
    }

    /// Derive `length` bytes of keying material bound to this connection,
    /// as described in RFC 5705.
    pub fn key_material_export(
        &self,
        label: &[u8],
        context: Option<&[u8]>,
        length: usize,
    ) -> Result<Vec<u8>, Error> {
        let secrets = self
            .active_state
            .as_ref()
            .and_then(|active| active.secrets.as_ref())
            .ok_or(Error::HandshakeNotComplete)?;

        let mut output = vec![0u8; length];
        secrets.export_keying_material(&mut output, label, context)?;
        Ok(output)
    }

    /// Whether a session is established and the connection open.
    pub fn is_active(&self) -> bool {
        self.active_state.is_some() && !self.connection_closed
    }

    /// Whether the connection was closed, by either side.
    pub fn is_closed(&self) -> bool {
        self.connection_closed
    }

    /// The version of the established session.
    pub fn protocol_version(&self) -> Option<ProtocolVersion> {
        self.active_state
            .as_ref()
            .map(|active| active.version())
    }

    /// The cipher suite of the established session.
    pub fn negotiated_cipher_suite(&self) -> Option<CipherSuite> {
        self.active_state
            .as_ref()
            .and_then(|active| active.cipher_suite())
    }

    /// The established session.
    pub fn session(&self) -> Option<&Session> {
        self.active_state
            .as_ref()
            .and_then(|active| active.session.as_ref())
    }

    /// Retransmit the last datagram flight if its timer expired.
    /// Returns true if anything was sent.
    pub fn timeout_check(&mut self) -> Result<bool, Error> {
        self.timeout_check_at(Instant::now())
    }

    /// As [`Channel::timeout_check`], taking the time from the caller.
    pub fn timeout_check_at(&mut self, now: Instant) -> Result<bool, Error> {
        let resend = match self.pending_state.as_mut() {
            Some(pending) => pending.io.timeout_check(now),
            None => return Ok(false),
        };

        if resend.is_empty() {
            return Ok(false);
        }

        debug!("retransmitting {} records", resend.len());
        self.send_outgoing(resend)?;
        Ok(true)
    }

    /// Begin a handshake for `version`.
    ///
    /// The first handshake fixes the transport.  A renegotiation keeps the
    /// version of the established session.
    pub(crate) fn create_handshake_state(&mut self, version: ProtocolVersion) -> Result<(), Error> {
        if self.pending_state.is_some() {
            return Err(Error::HandshakeAlreadyPending);
        }

        if let Some(active) = &self.active_state {
            if active.version().is_datagram() != version.is_datagram() {
                return Err(Error::TransportMismatch {
                    active: active.version(),
                    requested: version,
                });
            }
        }

        let seqs = self
            .sequence_numbers
            .get_or_insert_with(|| SequenceNumbers::new(version.is_datagram()));
        if seqs.is_datagram() != version.is_datagram() {
            return Err(Error::TransportMismatch {
                active: ProtocolVersion::initial_record_version(seqs.is_datagram()),
                requested: version,
            });
        }

        let read_epoch = seqs.current_read_epoch();
        let io: Box<dyn HandshakeIo> = match version.is_datagram() {
            true => Box::new(DatagramHandshakeIo::new(read_epoch)),
            false => Box::new(StreamHandshakeIo::new()),
        };

        let version = self
            .active_state
            .as_ref()
            .map(|active| active.version())
            .unwrap_or(version);

        let mut state = HandshakeState::new(version, io);
        state.state = Some(match &self.side {
            SideConfig::Client(config) => client::hs::expect_hello_request(Arc::clone(config)),
            SideConfig::Server(config) => server::hs::expect_client_hello(Arc::clone(config)),
        });

        debug!("handshake started, version {:?}", version);
        self.pending_state = Some(state);
        Ok(())
    }

    /// Promote the pending handshake to the established session.
    ///
    /// The swap is whole: afterwards the pending slot is empty and the
    /// active slot holds the completed handshake.
    pub(crate) fn activate_session(&mut self) {
        let pending = match self.pending_state.take() {
            Some(pending) => pending,
            None => return,
        };

        let datagram = pending.version().is_datagram();
        self.active_state = Some(pending);

        if !datagram {
            self.previous_write_cipher_state = None;
        }
        debug!("session activated");
    }

    /// Ask the application to approve the pending handshake, store the
    /// session and activate it.
    pub(crate) fn complete_handshake(&mut self) -> Result<(), Error> {
        let session = self.pending_session()?;

        if !self.callbacks.handshake_complete(&session) {
            debug!("application vetoed the session");
            return Err(Error::HandshakeVetoed);
        }

        if !session.id.is_empty() {
            self.side.session_store().save(&session);
        }

        self.pending_mut()?.session = Some(session);
        self.activate_session();
        Ok(())
    }

    fn pending_session(&self) -> Result<Session, Error> {
        let pending = self
            .pending_state
            .as_ref()
            .ok_or_else(|| Error::General("no handshake pending".into()))?;
        let server_hello = pending
            .server_hello
            .as_ref()
            .ok_or_else(|| Error::General("handshake completed without a server hello".into()))?;
        let secrets = pending
            .secrets
            .as_ref()
            .ok_or_else(|| Error::General("handshake completed without secrets".into()))?;
        let start_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)?
            .as_secs();

        Ok(Session::new(
            server_hello.session_id,
            pending.version(),
            server_hello.cipher_suite,
            self.side.side(),
            pending.psk_identity.clone(),
            start_time,
            secrets.master_secret(),
        ))
    }

    fn forget_session(&self) {
        let id = self
            .active_state
            .as_ref()
            .and_then(|active| active.session.as_ref())
            .map(|session| session.id);

        if let Some(id) = id {
            if !id.is_empty() {
                self.side.session_store().remove(&id);
            }
        }
    }

    fn reset_state(&mut self) {
        self.active_state = None;
        self.pending_state = None;
        self.read_cipher_state = None;
        self.write_cipher_state = None;
        self.previous_write_cipher_state = None;
    }

    /// The pending handshake's negotiated parameters, checked for use in
    /// a new cipher state.
    fn pending_for_cipher_change(&self) -> Result<&HandshakeState, Error> {
        let pending = self
            .pending_state
            .as_ref()
            .ok_or_else(|| Error::General("change cipher spec with no handshake pending".into()))?;
        let server_hello = pending
            .server_hello
            .as_ref()
            .ok_or_else(|| Error::General("change cipher spec before server hello".into()))?;

        if server_hello.compression_method != Compression::Null {
            return Err(Error::General(format!(
                "negotiated unsupported compression {:?}",
                server_hello.compression_method
            )));
        }
        if pending.secrets.is_none() {
            return Err(Error::General(
                "change cipher spec before key exchange".into(),
            ));
        }
        Ok(pending)
    }

    /// Start reading with the pending handshake's keys.  `side` is our
    /// side: we read with the peer's write keys.
    pub(crate) fn change_cipher_spec_reader(&mut self, side: Side) -> Result<(), Error> {
        let pending = self.pending_for_cipher_change()?;
        let secrets = pending
            .secrets
            .as_ref()
            .ok_or(Error::HandshakeNotComplete)?;
        let state = ConnectionCipherState::new_reader(side.peer(), secrets)?;

        self.sequence_numbers
            .as_mut()
            .ok_or_else(|| Error::General("no sequence numbers".into()))?
            .new_read_cipher_state()?;
        self.read_cipher_state = Some(state);
        debug!("read cipher state changed");
        Ok(())
    }

    /// Start writing with the pending handshake's keys for `side`.
    pub(crate) fn change_cipher_spec_writer(&mut self, side: Side) -> Result<(), Error> {
        let pending = self.pending_for_cipher_change()?;
        let secrets = pending
            .secrets
            .as_ref()
            .ok_or(Error::HandshakeNotComplete)?;
        let state = ConnectionCipherState::new_writer(side, secrets)?;

        self.sequence_numbers
            .as_mut()
            .ok_or_else(|| Error::General("no sequence numbers".into()))?
            .new_write_cipher_state()?;
        self.previous_write_cipher_state = self.write_cipher_state.replace(state);
        debug!("write cipher state changed");
        Ok(())
    }

    /// Check the renegotiation binding of a received ClientHello.
    pub(crate) fn secure_renegotiation_check_client_hello(
        &self,
        client_hello: &ClientHelloPayload,
    ) -> Result<(), Error> {
        let offered = client_hello.secure_renegotiation_info();

        if let Some(active) = &self.active_state {
            if active.client_secure_renegotiation() != offered.is_some() {
                return Err(PeerMisbehaved::SecureRenegotiationChanged.into());
            }
        }

        if let Some(data) = offered {
            let expected = self.secure_renegotiation_data_for_client_hello();
            if !bool::from(data.ct_eq(&expected)) {
                return Err(PeerMisbehaved::BadRenegotiationInfo.into());
            }
        }

        Ok(())
    }

    /// Check the renegotiation binding of a received ServerHello.
    pub(crate) fn secure_renegotiation_check_server_hello(
        &self,
        server_hello: &ServerHelloPayload,
    ) -> Result<(), Error> {
        let offered = server_hello.get_renegotiation_info();

        if let Some(active) = &self.active_state {
            if active.server_secure_renegotiation() != offered.is_some() {
                return Err(PeerMisbehaved::SecureRenegotiationChanged.into());
            }
        }

        if let Some(data) = offered {
            let expected = self.secure_renegotiation_data_for_server_hello();
            if !bool::from(data.ct_eq(&expected)) {
                return Err(PeerMisbehaved::BadRenegotiationInfo.into());
            }
        }

        Ok(())
    }

    /// The client's verify_data from the established session, or nothing
    /// on an initial handshake.
    pub(crate) fn secure_renegotiation_data_for_client_hello(&self) -> Vec<u8> {
        self.active_state
            .as_ref()
            .map(|active| active.client_verify_data.clone())
            .unwrap_or_default()
    }

    /// Both verify_data values from the established session, client's
    /// first, or nothing on an initial handshake.
    pub(crate) fn secure_renegotiation_data_for_server_hello(&self) -> Vec<u8> {
        match &self.active_state {
            Some(active) => {
                let mut data = active.client_verify_data.clone();
                data.extend_from_slice(&active.server_verify_data);
                data
            }
            None => Vec::new(),
        }
    }

    pub(crate) fn pending_mut(&mut self) -> Result<&mut HandshakeState, Error> {
        self.pending_state
            .as_mut()
            .ok_or_else(|| Error::General("no handshake pending".into()))
    }

    pub(crate) fn active_state(&self) -> Option<&HandshakeState> {
        self.active_state.as_ref()
    }

    fn current_write_epoch(&self) -> u16 {
        self.sequence_numbers
            .as_ref()
            .map(|seqs| seqs.current_write_epoch())
            .unwrap_or(0)
    }

    fn record_version(&self) -> Result<ProtocolVersion, Error> {
        self.pending_state
            .as_ref()
            .or(self.active_state.as_ref())
            .map(|state| state.version())
            .ok_or_else(|| Error::General("no connection state to write records under".into()))
    }

    /// Frame, record and send one handshake message, adding it to the
    /// transcript unless it is a HelloRequest.
    pub(crate) fn send_handshake_message(&mut self, payload: HandshakePayload) -> Result<(), Error> {
        let message = HandshakeMessagePayload::build(payload);
        let body = message.body_encoding();
        let epoch = self.current_write_epoch();
        let max_record = self.fragmenter.max_fragment_size();

        let pending = self.pending_mut()?;
        let (records, encoded) = pending
            .io
            .send_message(message.typ, &body, epoch, max_record);
        if message.typ != HandshakeType::HelloRequest {
            pending.transcript.add_message(&encoded);
        }

        trace!("sending handshake message {:?}", message.typ);
        self.send_outgoing(records)
    }

    pub(crate) fn send_change_cipher_spec(&mut self) -> Result<(), Error> {
        let epoch = self.current_write_epoch();
        let records = self
            .pending_mut()?
            .io
            .send_change_cipher_spec(epoch);
        self.send_outgoing(records)
    }

    fn send_outgoing(&mut self, records: Vec<OutgoingRecord>) -> Result<(), Error> {
        if records.is_empty() {
            return Ok(());
        }

        let version = self.record_version()?;
        for r in records {
            for m in self
                .fragmenter
                .fragment_slice(r.typ, version, &r.payload)
            {
                self.write_record(m, r.epoch)?;
            }
        }
        Ok(())
    }

    /// Send `data` as records of type `typ`, none larger than the maximum
    /// fragment size.  Empty data sends nothing.
    pub(crate) fn send_record_array(&mut self, typ: ContentType, data: &[u8]) -> Result<(), Error> {
        if data.is_empty() {
            return Ok(());
        }

        let version = self.record_version()?;
        let epoch = self.current_write_epoch();
        let mut data = data;

        // Implicit-IV CBC: the first byte goes alone, so the attacker can't
        // predict the IV of the record carrying the rest.
        let split_first = typ == ContentType::ApplicationData
            && self
                .write_cipher_state
                .as_ref()
                .map(|cipher| cipher.cbc_without_explicit_iv())
                .unwrap_or(false);
        if split_first {
            let (first, rest) = data.split_at(1);
            self.write_record(
                BorrowedPlainMessage {
                    typ,
                    version,
                    payload: first,
                },
                epoch,
            )?;
            data = rest;
        }

        for m in self
            .fragmenter
            .fragment_slice(typ, version, data)
        {
            self.write_record(m, epoch)?;
        }
        Ok(())
    }

    pub(crate) fn send_record(&mut self, typ: ContentType, data: &[u8]) -> Result<(), Error> {
        self.send_record_array(typ, data)
    }

    /// Protect and emit one record under `epoch`.
    ///
    /// The record must fit in one fragment, and some handshake state must
    /// exist to say which version it carries.
    pub(crate) fn write_record(&mut self, msg: BorrowedPlainMessage, epoch: u16) -> Result<(), Error> {
        let max = self.fragmenter.max_fragment_size();
        if msg.payload.len() > max {
            return Err(Error::RecordTooLarge {
                len: msg.payload.len(),
                max,
            });
        }

        if self.pending_state.is_none() && self.active_state.is_none() {
            return Err(Error::General(
                "no connection state to write records under".into(),
            ));
        }

        let seqs = self
            .sequence_numbers
            .as_mut()
            .ok_or_else(|| Error::General("no sequence numbers".into()))?;
        let current = seqs.current_write_epoch();
        let seq = seqs.next_write_sequence(epoch)?;

        let cipher = if epoch == current {
            self.write_cipher_state.as_mut()
        } else if epoch.checked_add(1) == Some(current) {
            self.previous_write_cipher_state.as_mut()
        } else {
            return Err(Error::General(format!(
                "cannot write a record for epoch {} in epoch {}",
                epoch, current
            )));
        };

        self.writebuf.clear();
        record::write_record(&mut self.writebuf, msg, seq, cipher)?;
        self.callbacks.emit(&self.writebuf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msgs::base::PayloadU8;
    use crate::msgs::enums::AlertLevel;
    use crate::msgs::handshake::{HelloExtension, Random, SessionId};
    use crate::server::ResolvesPsk;

    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorded {
        emitted: Vec<Vec<u8>>,
        alerts: Vec<Alert>,
    }

    struct Recorder(Arc<Mutex<Recorded>>);

    impl Callbacks for Recorder {
        fn emit(&mut self, data: &[u8]) {
            self.0.lock().unwrap().emitted.push(data.to_vec());
        }

        fn deliver(&mut self, event: Event<'_>) {
            if let Event::Alert(alert) = event {
                self.0.lock().unwrap().alerts.push(alert);
            }
        }

        fn handshake_complete(&mut self, _session: &Session) -> bool {
            true
        }
    }

    struct NoKeys;

    impl ResolvesPsk for NoKeys {
        fn resolve(&self, _identity: &[u8]) -> Option<Vec<u8>> {
            None
        }
    }

    fn server() -> (Channel, Arc<Mutex<Recorded>>) {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let config = Arc::new(ServerConfig::new(Arc::new(NoKeys)));
        let channel = Channel::new_server(config, Box::new(Recorder(Arc::clone(&recorded))));
        (channel, recorded)
    }

    fn app_data(payload: &[u8]) -> BorrowedPlainMessage<'_> {
        BorrowedPlainMessage {
            typ: ContentType::ApplicationData,
            version: ProtocolVersion::TLSv1_2,
            payload,
        }
    }

    #[test]
    fn write_record_needs_a_handshake_state() {
        let (mut channel, recorded) = server();
        assert!(matches!(
            channel.write_record(app_data(b"hi"), 0),
            Err(Error::General(_))
        ));
        assert!(recorded.lock().unwrap().emitted.is_empty());
    }

    #[test]
    fn write_record_rejects_oversized_fragments() {
        let (mut channel, _) = server();
        channel
            .create_handshake_state(ProtocolVersion::TLSv1_2)
            .unwrap();
        let big = vec![0u8; 16385];
        assert_eq!(
            channel.write_record(app_data(&big), 0),
            Err(Error::RecordTooLarge {
                len: 16385,
                max: 16384
            })
        );

        channel.set_maximum_fragment_size(512);
        assert_eq!(
            channel.write_record(app_data(&big[..513]), 0),
            Err(Error::RecordTooLarge { len: 513, max: 512 })
        );
    }

    #[test]
    fn second_pending_handshake_is_refused() {
        let (mut channel, _) = server();
        channel
            .create_handshake_state(ProtocolVersion::TLSv1_2)
            .unwrap();
        assert_eq!(
            channel.create_handshake_state(ProtocolVersion::TLSv1_2),
            Err(Error::HandshakeAlreadyPending)
        );
    }

    #[test]
    fn renegotiation_cannot_change_transport() {
        let (mut channel, _) = server();
        channel
            .create_handshake_state(ProtocolVersion::TLSv1_2)
            .unwrap();
        channel.activate_session();
        assert_eq!(
            channel.create_handshake_state(ProtocolVersion::DTLSv1_2),
            Err(Error::TransportMismatch {
                active: ProtocolVersion::TLSv1_2,
                requested: ProtocolVersion::DTLSv1_2,
            })
        );
    }

    #[test]
    fn activation_swaps_pending_into_active() {
        let (mut channel, _) = server();
        channel
            .create_handshake_state(ProtocolVersion::TLSv1_2)
            .unwrap();
        channel.activate_session();
        assert!(channel.pending_state.is_none());
        assert!(channel.active_state.is_some());
        assert!(channel.is_active());

        // nothing pending: the established state stays
        channel.activate_session();
        assert!(channel.active_state.is_some());

        channel
            .create_handshake_state(ProtocolVersion::TLSv1_2)
            .unwrap();
        channel
            .pending_state
            .as_mut()
            .unwrap()
            .client_verify_data = vec![9; 12];
        channel.activate_session();
        assert!(channel.pending_state.is_none());
        assert_eq!(
            channel
                .active_state
                .as_ref()
                .unwrap()
                .client_verify_data,
            vec![9; 12]
        );
    }

    #[test]
    fn renegotiation_binding_data() {
        let (mut channel, _) = server();
        assert!(channel
            .secure_renegotiation_data_for_client_hello()
            .is_empty());
        assert!(channel
            .secure_renegotiation_data_for_server_hello()
            .is_empty());

        channel
            .create_handshake_state(ProtocolVersion::TLSv1_2)
            .unwrap();
        {
            let pending = channel.pending_state.as_mut().unwrap();
            pending.client_verify_data = vec![1; 12];
            pending.server_verify_data = vec![2; 12];
        }
        channel.activate_session();

        assert_eq!(
            channel.secure_renegotiation_data_for_client_hello(),
            vec![1; 12]
        );
        let mut both = vec![1; 12];
        both.extend_from_slice(&[2; 12]);
        assert_eq!(channel.secure_renegotiation_data_for_server_hello(), both);
    }

    #[test]
    fn application_data_is_split_at_the_fragment_size() {
        let (mut channel, recorded) = server();
        channel
            .create_handshake_state(ProtocolVersion::TLSv1_2)
            .unwrap();
        channel
            .send_record_array(ContentType::ApplicationData, &[0x55; 20000])
            .unwrap();

        let lens: Vec<usize> = recorded
            .lock()
            .unwrap()
            .emitted
            .iter()
            .map(|r| r.len())
            .collect();
        assert_eq!(lens, vec![5 + 16384, 5 + 3616]);
    }

    #[test]
    fn empty_application_data_sends_nothing() {
        let (mut channel, recorded) = server();
        channel
            .create_handshake_state(ProtocolVersion::TLSv1_2)
            .unwrap();
        channel
            .send_record(ContentType::ApplicationData, &[])
            .unwrap();
        assert!(recorded.lock().unwrap().emitted.is_empty());
    }

    #[test]
    fn cipher_change_needs_negotiated_parameters() {
        let (mut channel, _) = server();
        assert!(channel
            .change_cipher_spec_reader(Side::Server)
            .is_err());
        channel
            .create_handshake_state(ProtocolVersion::TLSv1_2)
            .unwrap();
        assert!(channel
            .change_cipher_spec_writer(Side::Server)
            .is_err());
        assert!(channel.read_cipher_state.is_none());
        assert!(channel.write_cipher_state.is_none());
    }

    #[test]
    fn send_requires_an_active_session() {
        let (mut channel, _) = server();
        assert_eq!(channel.send(b"hi"), Err(Error::HandshakeNotComplete));
        assert_eq!(channel.renegotiate(false), Err(Error::HandshakeNotComplete));
        assert_eq!(
            channel.key_material_export(b"label", None, 16),
            Err(Error::HandshakeNotComplete)
        );
    }

    #[test]
    fn close_is_idempotent() {
        let (mut channel, recorded) = server();
        channel
            .create_handshake_state(ProtocolVersion::TLSv1_2)
            .unwrap();
        channel.activate_session();

        channel.close();
        channel.close();
        assert!(channel.is_closed());
        assert!(!channel.is_active());
        assert_eq!(
            recorded.lock().unwrap().emitted,
            vec![vec![0x15, 0x03, 0x03, 0x00, 0x02, 0x01, 0x00]]
        );
        assert_eq!(channel.send(b"late"), Err(Error::ConnectionClosed));
    }

    #[test]
    fn application_data_before_handshake_is_unexpected() {
        let (mut channel, recorded) = server();
        let err = channel
            .received_data(&[0x17, 0x03, 0x03, 0x00, 0x01, 0x00])
            .unwrap_err();
        assert!(matches!(err, Error::InappropriateMessage { .. }));
        // no state to write an alert under
        assert!(recorded.lock().unwrap().emitted.is_empty());
        assert!(channel.is_closed());
    }

    #[test]
    fn fatal_alert_tears_down() {
        let (mut channel, recorded) = server();
        channel
            .create_handshake_state(ProtocolVersion::TLSv1_2)
            .unwrap();
        channel.activate_session();

        let needed = channel
            .received_data(&[
                0x15, 0x03, 0x03, 0x00, 0x02, 0x02, 0x28, // fatal handshake_failure
                0x17, 0x03, 0x03, 0x00, 0x01, 0x00,
            ])
            .unwrap();
        assert_eq!(needed, 0);
        assert!(channel.is_closed());
        assert!(channel.active_state.is_none());

        let recorded = recorded.lock().unwrap();
        assert_eq!(
            recorded.alerts,
            vec![Alert {
                level: AlertLevel::Fatal,
                description: AlertDescription::HandshakeFailure,
            }]
        );
        assert!(recorded.emitted.is_empty());
        drop(recorded);

        assert_eq!(
            channel.send(b"late"),
            Err(Error::AlertReceived(AlertDescription::HandshakeFailure))
        );
    }

    fn client_hello(renegotiation_info: Option<Vec<u8>>) -> ClientHelloPayload {
        ClientHelloPayload {
            client_version: ProtocolVersion::TLSv1_2,
            random: Random([0u8; 32]),
            session_id: SessionId::empty(),
            cookie: None,
            cipher_suites: vec![CipherSuite::TLS_PSK_WITH_AES_128_GCM_SHA256],
            compression_methods: vec![Compression::Null],
            extensions: renegotiation_info
                .map(|ri| vec![HelloExtension::RenegotiationInfo(PayloadU8::new(ri))])
                .unwrap_or_default(),
        }
    }

    #[test]
    fn client_hello_binding_is_checked() {
        let (mut channel, _) = server();
        assert_eq!(
            channel.secure_renegotiation_check_client_hello(&client_hello(Some(vec![]))),
            Ok(())
        );
        assert_eq!(
            channel.secure_renegotiation_check_client_hello(&client_hello(None)),
            Ok(())
        );
        assert_eq!(
            channel.secure_renegotiation_check_client_hello(&client_hello(Some(vec![1; 12]))),
            Err(PeerMisbehaved::BadRenegotiationInfo.into())
        );

        channel
            .create_handshake_state(ProtocolVersion::TLSv1_2)
            .unwrap();
        {
            let pending = channel.pending_state.as_mut().unwrap();
            pending.client_hello = Some(client_hello(Some(vec![])));
            pending.client_verify_data = vec![1; 12];
        }
        channel.activate_session();

        assert_eq!(
            channel.secure_renegotiation_check_client_hello(&client_hello(Some(vec![1; 12]))),
            Ok(())
        );
        assert_eq!(
            channel.secure_renegotiation_check_client_hello(&client_hello(Some(vec![2; 12]))),
            Err(PeerMisbehaved::BadRenegotiationInfo.into())
        );
        assert_eq!(
            channel.secure_renegotiation_check_client_hello(&client_hello(Some(vec![]))),
            Err(PeerMisbehaved::BadRenegotiationInfo.into())
        );
        // dropping the extension on renegotiation is not allowed either
        assert_eq!(
            channel.secure_renegotiation_check_client_hello(&client_hello(None)),
            Err(PeerMisbehaved::SecureRenegotiationChanged.into())
        );
    }

    fn client() -> (Channel, Arc<Mutex<Recorded>>) {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let config = Arc::new(ClientConfig::new(&b"client"[..], vec![1u8; 32]));
        let channel = Channel::new_client(
            config,
            Box::new(Recorder(Arc::clone(&recorded))),
            ProtocolVersion::TLSv1_2,
        )
        .unwrap();
        (channel, recorded)
    }

    fn server_hello(
        version: ProtocolVersion,
        renegotiation_info: Option<Vec<u8>>,
    ) -> ServerHelloPayload {
        ServerHelloPayload {
            server_version: version,
            random: Random([0u8; 32]),
            session_id: SessionId::empty(),
            cipher_suite: CipherSuite::TLS_PSK_WITH_AES_128_GCM_SHA256,
            compression_method: Compression::Null,
            extensions: renegotiation_info
                .map(|ri| vec![HelloExtension::RenegotiationInfo(PayloadU8::new(ri))])
                .unwrap_or_default(),
        }
    }

    /// Promote the client's pending handshake as if the server had agreed
    /// to secure renegotiation.
    fn activate_with_binding(channel: &mut Channel) {
        let pending = channel.pending_state.as_mut().unwrap();
        pending.server_hello = Some(server_hello(ProtocolVersion::TLSv1_2, Some(vec![])));
        pending.client_verify_data = vec![1; 12];
        pending.server_verify_data = vec![2; 12];
        channel.activate_session();
    }

    #[test]
    fn server_hello_binding_is_checked() {
        let (mut channel, _) = client();
        let check = |channel: &Channel, ri: Option<Vec<u8>>| {
            channel.secure_renegotiation_check_server_hello(&server_hello(
                ProtocolVersion::TLSv1_2,
                ri,
            ))
        };

        assert_eq!(check(&channel, Some(vec![])), Ok(()));
        assert_eq!(check(&channel, None), Ok(()));
        assert_eq!(
            check(&channel, Some(vec![1; 24])),
            Err(PeerMisbehaved::BadRenegotiationInfo.into())
        );

        activate_with_binding(&mut channel);
        let mut both = vec![1u8; 12];
        both.extend_from_slice(&[2; 12]);

        assert_eq!(check(&channel, Some(both)), Ok(()));
        assert_eq!(
            check(&channel, Some(vec![1; 24])),
            Err(PeerMisbehaved::BadRenegotiationInfo.into())
        );
        assert_eq!(
            check(&channel, Some(vec![1; 12])),
            Err(PeerMisbehaved::BadRenegotiationInfo.into())
        );
        assert_eq!(
            check(&channel, Some(vec![])),
            Err(PeerMisbehaved::BadRenegotiationInfo.into())
        );
        assert_eq!(
            check(&channel, None),
            Err(PeerMisbehaved::SecureRenegotiationChanged.into())
        );
    }

    fn incoming_server_hello(server_hello: ServerHelloPayload) -> Incoming {
        Incoming::Handshake {
            payload: HandshakeMessagePayload {
                typ: HandshakeType::ServerHello,
                payload: HandshakePayload::ServerHello(server_hello),
            },
            encoded: Vec::new(),
        }
    }

    #[test]
    fn renegotiation_server_hello_binding_comes_first() {
        let (mut channel, _) = client();
        activate_with_binding(&mut channel);
        channel.renegotiate(false).unwrap();

        // wrong binding and a changed version: the binding is reported
        let tampered = server_hello(ProtocolVersion::TLSv1_0, Some(vec![9; 24]));
        let err = channel
            .process_handshake_msg(incoming_server_hello(tampered))
            .unwrap_err();
        assert_eq!(err, PeerMisbehaved::BadRenegotiationInfo.into());
        assert_eq!(err.fatal_alert(), Some(AlertDescription::HandshakeFailure));
    }

    #[test]
    fn renegotiation_server_hello_may_not_drop_the_extension() {
        let (mut channel, _) = client();
        activate_with_binding(&mut channel);
        channel.renegotiate(false).unwrap();

        let dropped = server_hello(ProtocolVersion::TLSv1_2, None);
        assert_eq!(
            channel.process_handshake_msg(incoming_server_hello(dropped)),
            Err(PeerMisbehaved::SecureRenegotiationChanged.into())
        );
    }
}
