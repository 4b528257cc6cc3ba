use crate::channel::Channel;
use crate::enums::{CipherSuite, ContentType, ProtocolVersion};
use crate::error::Error;
use crate::hash_hs::Transcript;
use crate::msgs::enums::HeartbeatMode;
use crate::msgs::handshake::{
    ClientHelloPayload, HandshakeMessagePayload, HasHelloExtensions, ServerHelloPayload,
};
use crate::session::Session;
use crate::tls12::ConnectionSecrets;

pub(crate) mod io;

use self::io::{HandshakeFrame, HandshakeIo};

/// A reassembled handshake-layer message, parsed and ready for the state
/// machine.
#[derive(Debug)]
pub(crate) enum Incoming {
    ChangeCipherSpec,
    Handshake {
        payload: HandshakeMessagePayload,
        /// The transcript encoding of the message.
        encoded: Vec<u8>,
    },
}

impl Incoming {
    pub(crate) fn parse(frame: HandshakeFrame) -> Result<Self, Error> {
        Ok(match frame {
            HandshakeFrame::ChangeCipherSpec => Self::ChangeCipherSpec,
            HandshakeFrame::Message(m) => Self::Handshake {
                payload: HandshakeMessagePayload::read_body(m.typ, &m.body)?,
                encoded: m.encoded,
            },
        })
    }

    pub(crate) fn content_type(&self) -> ContentType {
        match self {
            Self::ChangeCipherSpec => ContentType::ChangeCipherSpec,
            Self::Handshake { .. } => ContentType::Handshake,
        }
    }

    /// The transcript encoding, for handshake messages.
    pub(crate) fn encoded(&self) -> &[u8] {
        match self {
            Self::ChangeCipherSpec => &[],
            Self::Handshake { encoded, .. } => encoded,
        }
    }
}

/// One step of a side's handshake state machine.
pub(crate) trait State: Send {
    /// Process `m`, returning the state that handles the next message.
    fn handle(self: Box<Self>, cx: &mut Channel, m: Incoming) -> Result<Box<dyn State>, Error>;

    /// Whether the next frame should be a ChangeCipherSpec.
    fn expecting_ccs(&self) -> bool {
        false
    }
}

/// Everything one handshake attempt accumulates.
///
/// Created when a handshake starts; either promoted to the channel's active
/// state when it completes, or dropped.
pub(crate) struct HandshakeState {
    version: ProtocolVersion,
    pub(crate) io: Box<dyn HandshakeIo>,
    pub(crate) transcript: Transcript,
    pub(crate) client_hello: Option<ClientHelloPayload>,
    pub(crate) server_hello: Option<ServerHelloPayload>,
    pub(crate) secrets: Option<ConnectionSecrets>,
    pub(crate) client_verify_data: Vec<u8>,
    pub(crate) server_verify_data: Vec<u8>,
    pub(crate) psk_identity: Vec<u8>,
    /// The heartbeat mode the peer announced, if the extension was
    /// negotiated.
    pub(crate) peer_heartbeat_mode: Option<HeartbeatMode>,
    /// Set once the application approved the handshake.
    pub(crate) session: Option<Session>,
    pub(crate) state: Option<Box<dyn State>>,
}

impl HandshakeState {
    pub(crate) fn new(version: ProtocolVersion, io: Box<dyn HandshakeIo>) -> Self {
        Self {
            version,
            io,
            transcript: Transcript::new(),
            client_hello: None,
            server_hello: None,
            secrets: None,
            client_verify_data: Vec::new(),
            server_verify_data: Vec::new(),
            psk_identity: Vec::new(),
            peer_heartbeat_mode: None,
            session: None,
            state: None,
        }
    }

    pub(crate) fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub(crate) fn set_version(&mut self, version: ProtocolVersion) {
        self.version = version;
    }

    pub(crate) fn expecting_ccs(&self) -> bool {
        self.state
            .as_ref()
            .map(|s| s.expecting_ccs())
            .unwrap_or(false)
    }

    pub(crate) fn cipher_suite(&self) -> Option<CipherSuite> {
        self.server_hello
            .as_ref()
            .map(|sh| sh.cipher_suite)
    }

    /// Whether the client asked for secure renegotiation.
    pub(crate) fn client_secure_renegotiation(&self) -> bool {
        self.client_hello
            .as_ref()
            .map(|ch| ch.secure_renegotiation_info().is_some())
            .unwrap_or(false)
    }

    /// Whether the server agreed to secure renegotiation.
    pub(crate) fn server_secure_renegotiation(&self) -> bool {
        self.server_hello
            .as_ref()
            .map(|sh| sh.get_renegotiation_info().is_some())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::io::{HandshakeMessage, StreamHandshakeIo};
    use super::*;
    use crate::enums::HandshakeType;
    use crate::error::InvalidMessage;
    use crate::msgs::handshake::HandshakePayload;

    #[test]
    fn incoming_parses_bodies() {
        let m = Incoming::parse(HandshakeFrame::Message(HandshakeMessage {
            typ: HandshakeType::ServerHelloDone,
            body: vec![],
            encoded: vec![0x0e, 0, 0, 0],
        }))
        .unwrap();
        assert_eq!(m.content_type(), ContentType::Handshake);
        assert_eq!(m.encoded(), &[0x0e, 0, 0, 0]);
        assert!(matches!(
            m,
            Incoming::Handshake {
                payload: HandshakeMessagePayload {
                    payload: HandshakePayload::ServerHelloDone,
                    ..
                },
                ..
            }
        ));

        let err = Incoming::parse(HandshakeFrame::Message(HandshakeMessage {
            typ: HandshakeType::ServerHelloDone,
            body: vec![1],
            encoded: vec![0x0e, 0, 0, 1, 1],
        }))
        .unwrap_err();
        assert_eq!(
            err,
            Error::InvalidMessage(InvalidMessage::TrailingData("HandshakeMessagePayload"))
        );
    }

    #[test]
    fn fresh_state_has_nothing_negotiated() {
        let hs = HandshakeState::new(ProtocolVersion::TLSv1_2, Box::new(StreamHandshakeIo::new()));
        assert_eq!(hs.version(), ProtocolVersion::TLSv1_2);
        assert!(!hs.expecting_ccs());
        assert!(hs.cipher_suite().is_none());
        assert!(!hs.client_secure_renegotiation());
        assert!(!hs.server_secure_renegotiation());
    }
}
