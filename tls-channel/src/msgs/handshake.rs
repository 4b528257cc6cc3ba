use crate::enums::{CipherSuite, HandshakeType, ProtocolVersion};
use crate::error::InvalidMessage;
use crate::msgs::base::{Payload, PayloadU16, PayloadU8};
use crate::msgs::codec::{self, Codec, Reader};
use crate::msgs::enums::{Compression, ExtensionType, HeartbeatMode, MaxFragmentLength};
use crate::rand;

use std::collections;
use std::fmt;

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Random(pub [u8; 32]);

impl fmt::Debug for Random {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        super::base::hex(f, &self.0)
    }
}

impl Codec for Random {
    fn encode(&self, bytes: &mut Vec<u8>) {
        bytes.extend_from_slice(&self.0);
    }

    fn read(r: &mut Reader) -> Result<Self, InvalidMessage> {
        let bytes = match r.take(32) {
            Some(bytes) => bytes,
            None => return Err(InvalidMessage::MissingData("Random")),
        };

        let mut opaque = [0; 32];
        opaque.clone_from_slice(bytes);
        Ok(Self(opaque))
    }
}

impl Random {
    pub(crate) fn new() -> Result<Self, rand::GetRandomFailed> {
        let mut data = [0u8; 32];
        rand::fill_random(&mut data)?;
        Ok(Self(data))
    }
}

#[derive(Copy, Clone)]
pub struct SessionId {
    len: usize,
    data: [u8; 32],
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        super::base::hex(f, &self.data[..self.len])
    }
}

impl PartialEq for SessionId {
    fn eq(&self, other: &Self) -> bool {
        self.as_ref() == other.as_ref()
    }
}

impl Eq for SessionId {}

impl std::hash::Hash for SessionId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.as_ref().hash(state)
    }
}

impl Codec for SessionId {
    fn encode(&self, bytes: &mut Vec<u8>) {
        debug_assert!(self.len <= 32);
        bytes.push(self.len as u8);
        bytes.extend_from_slice(&self.data[..self.len]);
    }

    fn read(r: &mut Reader) -> Result<Self, InvalidMessage> {
        let len = u8::read(r)? as usize;
        if len > 32 {
            return Err(InvalidMessage::TrailingData("SessionID"));
        }

        let bytes = match r.take(len) {
            Some(bytes) => bytes,
            None => return Err(InvalidMessage::MissingData("SessionID")),
        };

        let mut out = [0u8; 32];
        out[..len].clone_from_slice(&bytes[..len]);
        Ok(Self { data: out, len })
    }
}

impl SessionId {
    pub(crate) fn random() -> Result<Self, rand::GetRandomFailed> {
        let mut data = [0u8; 32];
        rand::fill_random(&mut data)?;
        Ok(Self { data, len: 32 })
    }

    pub fn empty() -> Self {
        Self {
            data: [0u8; 32],
            len: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl AsRef<[u8]> for SessionId {
    fn as_ref(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

#[derive(Clone, Debug)]
pub struct UnknownExtension {
    pub typ: ExtensionType,
    pub payload: Payload,
}

/// A hello extension.  Both hellos share one representation: the
/// extensions this crate speaks have the same body either way.
#[derive(Clone, Debug)]
pub enum HelloExtension {
    /// RFC 5746 renegotiation binding.
    RenegotiationInfo(PayloadU8),
    /// RFC 6520 heartbeat mode.
    Heartbeat(HeartbeatMode),
    /// RFC 6066 maximum fragment length.
    MaxFragmentLength(MaxFragmentLength),
    Unknown(UnknownExtension),
}

impl HelloExtension {
    pub fn get_type(&self) -> ExtensionType {
        match self {
            Self::RenegotiationInfo(_) => ExtensionType::RenegotiationInfo,
            Self::Heartbeat(_) => ExtensionType::Heartbeat,
            Self::MaxFragmentLength(_) => ExtensionType::MaxFragmentLength,
            Self::Unknown(r) => r.typ,
        }
    }
}

impl Codec for HelloExtension {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.get_type().encode(bytes);

        let mut sub: Vec<u8> = Vec::new();
        match self {
            Self::RenegotiationInfo(r) => r.encode(&mut sub),
            Self::Heartbeat(mode) => mode.encode(&mut sub),
            Self::MaxFragmentLength(code) => code.encode(&mut sub),
            Self::Unknown(r) => r.payload.encode(&mut sub),
        }

        (sub.len() as u16).encode(bytes);
        bytes.append(&mut sub);
    }

    fn read(r: &mut Reader) -> Result<Self, InvalidMessage> {
        let typ = ExtensionType::read(r)?;
        let len = u16::read(r)? as usize;
        let mut sub = r.sub(len)?;

        let ext = match typ {
            ExtensionType::RenegotiationInfo => Self::RenegotiationInfo(PayloadU8::read(&mut sub)?),
            ExtensionType::Heartbeat => Self::Heartbeat(HeartbeatMode::read(&mut sub)?),
            ExtensionType::MaxFragmentLength => {
                Self::MaxFragmentLength(MaxFragmentLength::read(&mut sub)?)
            }
            _ => Self::Unknown(UnknownExtension {
                typ,
                payload: Payload::read(&mut sub),
            }),
        };

        sub.expect_empty("HelloExtension")
            .map(|_| ext)
    }
}

fn read_extensions(r: &mut Reader) -> Result<Vec<HelloExtension>, InvalidMessage> {
    match r.any_left() {
        true => codec::read_vec_u16::<HelloExtension>(r),
        false => Ok(Vec::new()),
    }
}

/// Queries shared by both hellos.
pub trait HasHelloExtensions {
    fn get_extensions(&self) -> &[HelloExtension];

    fn find_extension(&self, ext: ExtensionType) -> Option<&HelloExtension> {
        self.get_extensions()
            .iter()
            .find(|x| x.get_type() == ext)
    }

    fn has_duplicate_extension(&self) -> bool {
        let mut seen = collections::HashSet::new();

        for ext in self.get_extensions() {
            let typ = ext.get_type().get_uint();

            if seen.contains(&typ) {
                return true;
            }
            seen.insert(typ);
        }

        false
    }

    fn get_renegotiation_info(&self) -> Option<&[u8]> {
        match self.find_extension(ExtensionType::RenegotiationInfo)? {
            HelloExtension::RenegotiationInfo(info) => Some(&info.0),
            _ => None,
        }
    }

    fn get_heartbeat_mode(&self) -> Option<HeartbeatMode> {
        match self.find_extension(ExtensionType::Heartbeat)? {
            HelloExtension::Heartbeat(mode) => Some(*mode),
            _ => None,
        }
    }

    fn get_max_fragment_length(&self) -> Option<MaxFragmentLength> {
        match self.find_extension(ExtensionType::MaxFragmentLength)? {
            HelloExtension::MaxFragmentLength(code) => Some(*code),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ClientHelloPayload {
    pub client_version: ProtocolVersion,
    pub random: Random,
    pub session_id: SessionId,
    /// Present exactly when `client_version` is a datagram version.
    pub cookie: Option<PayloadU8>,
    pub cipher_suites: Vec<CipherSuite>,
    pub compression_methods: Vec<Compression>,
    pub extensions: Vec<HelloExtension>,
}

impl Codec for ClientHelloPayload {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.client_version.encode(bytes);
        self.random.encode(bytes);
        self.session_id.encode(bytes);
        if let Some(cookie) = &self.cookie {
            cookie.encode(bytes);
        }
        codec::encode_vec_u16(bytes, &self.cipher_suites);
        codec::encode_vec_u8(bytes, &self.compression_methods);

        if !self.extensions.is_empty() {
            codec::encode_vec_u16(bytes, &self.extensions);
        }
    }

    fn read(r: &mut Reader) -> Result<Self, InvalidMessage> {
        let client_version = ProtocolVersion::read(r)?;
        let random = Random::read(r)?;
        let session_id = SessionId::read(r)?;
        let cookie = match client_version.is_datagram() {
            true => Some(PayloadU8::read(r)?),
            false => None,
        };

        let ret = Self {
            client_version,
            random,
            session_id,
            cookie,
            cipher_suites: codec::read_vec_u16::<CipherSuite>(r)?,
            compression_methods: codec::read_vec_u8::<Compression>(r)?,
            extensions: read_extensions(r)?,
        };

        r.expect_empty("ClientHelloPayload")
            .map(|_| ret)
    }
}

impl HasHelloExtensions for ClientHelloPayload {
    fn get_extensions(&self) -> &[HelloExtension] {
        &self.extensions
    }
}

impl ClientHelloPayload {
    /// The renegotiation binding the client offered, if any.  The
    /// signalling cipher suite counts as an empty binding.
    pub fn secure_renegotiation_info(&self) -> Option<&[u8]> {
        match self.get_renegotiation_info() {
            Some(info) => Some(info),
            None if self
                .cipher_suites
                .contains(&CipherSuite::TLS_EMPTY_RENEGOTIATION_INFO_SCSV) =>
            {
                Some(&[])
            }
            None => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerHelloPayload {
    pub server_version: ProtocolVersion,
    pub random: Random,
    pub session_id: SessionId,
    pub cipher_suite: CipherSuite,
    pub compression_method: Compression,
    pub extensions: Vec<HelloExtension>,
}

impl Codec for ServerHelloPayload {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.server_version.encode(bytes);
        self.random.encode(bytes);
        self.session_id.encode(bytes);
        self.cipher_suite.encode(bytes);
        self.compression_method.encode(bytes);

        if !self.extensions.is_empty() {
            codec::encode_vec_u16(bytes, &self.extensions);
        }
    }

    fn read(r: &mut Reader) -> Result<Self, InvalidMessage> {
        let ret = Self {
            server_version: ProtocolVersion::read(r)?,
            random: Random::read(r)?,
            session_id: SessionId::read(r)?,
            cipher_suite: CipherSuite::read(r)?,
            compression_method: Compression::read(r)?,
            extensions: read_extensions(r)?,
        };

        r.expect_empty("ServerHelloPayload")
            .map(|_| ret)
    }
}

impl HasHelloExtensions for ServerHelloPayload {
    fn get_extensions(&self) -> &[HelloExtension] {
        &self.extensions
    }
}

/// RFC 4279 ServerKeyExchange for plain PSK: just the identity hint.
#[derive(Clone, Debug)]
pub struct ServerPskKeyExchange {
    pub identity_hint: PayloadU16,
}

/// RFC 4279 ClientKeyExchange for plain PSK: the chosen identity.
#[derive(Clone, Debug)]
pub struct ClientPskKeyExchange {
    pub identity: PayloadU16,
}

#[derive(Clone, Debug)]
pub enum HandshakePayload {
    HelloRequest,
    ClientHello(ClientHelloPayload),
    ServerHello(ServerHelloPayload),
    ServerKeyExchange(ServerPskKeyExchange),
    ServerHelloDone,
    ClientKeyExchange(ClientPskKeyExchange),
    Finished(Payload),
    Unknown(Payload),
}

impl HandshakePayload {
    fn encode(&self, bytes: &mut Vec<u8>) {
        use self::HandshakePayload::*;
        match self {
            HelloRequest | ServerHelloDone => {}
            ClientHello(x) => x.encode(bytes),
            ServerHello(x) => x.encode(bytes),
            ServerKeyExchange(x) => x.identity_hint.encode(bytes),
            ClientKeyExchange(x) => x.identity.encode(bytes),
            Finished(x) => x.encode(bytes),
            Unknown(x) => x.encode(bytes),
        }
    }
}

/// A handshake message body together with its type.  The framing header
/// depends on the transport and is added by the handshake IO.
#[derive(Clone, Debug)]
pub struct HandshakeMessagePayload {
    pub typ: HandshakeType,
    pub payload: HandshakePayload,
}

impl HandshakeMessagePayload {
    /// Parse the body of a message whose header named `typ`.
    pub fn read_body(typ: HandshakeType, body: &[u8]) -> Result<Self, InvalidMessage> {
        let mut sub = Reader::init(body);
        let payload = match typ {
            HandshakeType::HelloRequest if sub.left() == 0 => HandshakePayload::HelloRequest,
            HandshakeType::ClientHello => {
                HandshakePayload::ClientHello(ClientHelloPayload::read(&mut sub)?)
            }
            HandshakeType::ServerHello => {
                HandshakePayload::ServerHello(ServerHelloPayload::read(&mut sub)?)
            }
            HandshakeType::ServerKeyExchange => {
                HandshakePayload::ServerKeyExchange(ServerPskKeyExchange {
                    identity_hint: PayloadU16::read(&mut sub)?,
                })
            }
            HandshakeType::ServerHelloDone if sub.left() == 0 => HandshakePayload::ServerHelloDone,
            HandshakeType::ClientKeyExchange => {
                HandshakePayload::ClientKeyExchange(ClientPskKeyExchange {
                    identity: PayloadU16::read(&mut sub)?,
                })
            }
            HandshakeType::Finished => HandshakePayload::Finished(Payload::read(&mut sub)),
            HandshakeType::HelloRequest | HandshakeType::ServerHelloDone => {
                return Err(InvalidMessage::TrailingData("HandshakeMessagePayload"));
            }
            _ => HandshakePayload::Unknown(Payload::read(&mut sub)),
        };

        sub.expect_empty("HandshakeMessagePayload")
            .map(|_| Self { typ, payload })
    }

    pub fn build(payload: HandshakePayload) -> Self {
        let typ = match &payload {
            HandshakePayload::HelloRequest => HandshakeType::HelloRequest,
            HandshakePayload::ClientHello(_) => HandshakeType::ClientHello,
            HandshakePayload::ServerHello(_) => HandshakeType::ServerHello,
            HandshakePayload::ServerKeyExchange(_) => HandshakeType::ServerKeyExchange,
            HandshakePayload::ServerHelloDone => HandshakeType::ServerHelloDone,
            HandshakePayload::ClientKeyExchange(_) => HandshakeType::ClientKeyExchange,
            HandshakePayload::Finished(_) => HandshakeType::Finished,
            HandshakePayload::Unknown(_) => HandshakeType::Unknown(0xff),
        };
        Self { typ, payload }
    }

    pub fn body_encoding(&self) -> Vec<u8> {
        let mut body = Vec::new();
        self.payload.encode(&mut body);
        body
    }
}
