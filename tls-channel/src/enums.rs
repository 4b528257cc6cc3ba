#![allow(non_camel_case_types)]
#![allow(missing_docs)]
use crate::msgs::codec::{Codec, Reader};

use std::fmt;

enum_builder! {
    /// The `AlertDescription` TLS protocol enum.  Values in this enum are taken
    /// from the various RFCs covering TLS, and are listed by IANA.
    /// The `Unknown` item is used when processing unrecognized ordinals.
    #[repr(u8)]
    pub enum AlertDescription {
        CloseNotify => 0x00,
        UnexpectedMessage => 0x0a,
        BadRecordMac => 0x14,
        DecryptionFailed => 0x15,
        RecordOverflow => 0x16,
        DecompressionFailure => 0x1e,
        HandshakeFailure => 0x28,
        NoCertificate => 0x29,
        BadCertificate => 0x2a,
        UnsupportedCertificate => 0x2b,
        CertificateRevoked => 0x2c,
        CertificateExpired => 0x2d,
        CertificateUnknown => 0x2e,
        IllegalParameter => 0x2f,
        UnknownCa => 0x30,
        AccessDenied => 0x31,
        DecodeError => 0x32,
        DecryptError => 0x33,
        ExportRestriction => 0x3c,
        ProtocolVersion => 0x46,
        InsufficientSecurity => 0x47,
        InternalError => 0x50,
        InappropriateFallback => 0x56,
        UserCanceled => 0x5a,
        NoRenegotiation => 0x64,
        MissingExtension => 0x6d,
        UnsupportedExtension => 0x6e,
        CertificateUnobtainable => 0x6f,
        UnrecognizedName => 0x70,
        BadCertificateStatusResponse => 0x71,
        BadCertificateHashValue => 0x72,
        UnknownPskIdentity => 0x73,
    }
}

impl fmt::Display for AlertDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CloseNotify => write!(f, "cleanly closed the connection"),
            Self::NoRenegotiation => write!(f, "declined to renegotiate"),
            Self::UnexpectedMessage => write!(f, "received an unexpected message"),
            Self::BadRecordMac => write!(f, "failed to verify a message"),
            Self::RecordOverflow => write!(f, "rejected an over-length message"),
            Self::HandshakeFailure => write!(f, "failed to negotiate an acceptable set of security parameters"),
            Self::IllegalParameter => write!(f, "rejected a message because a field was incorrect or inconsistent"),
            Self::DecodeError => write!(f, "failed to decode a message"),
            Self::DecryptError => write!(f, "failed to perform a handshake cryptographic operation"),
            Self::ProtocolVersion => write!(f, "rejected an unsupported protocol version"),
            Self::InternalError => write!(f, "encountered an internal error"),
            Self::UnsupportedExtension => write!(f, "rejected an unsupported extension"),
            Self::UnknownPskIdentity => write!(f, "did not recognise a pre-shared key identity"),
            _ => write!(f, "sent alert {:?}", self),
        }
    }
}

enum_builder! {
    /// The `HandshakeType` TLS protocol enum.  Values in this enum are taken
    /// from the various RFCs covering TLS, and are listed by IANA.
    /// The `Unknown` item is used when processing unrecognized ordinals.
    #[repr(u8)]
    pub enum HandshakeType {
        HelloRequest => 0x00,
        ClientHello => 0x01,
        ServerHello => 0x02,
        HelloVerifyRequest => 0x03,
        NewSessionTicket => 0x04,
        Certificate => 0x0b,
        ServerKeyExchange => 0x0c,
        CertificateRequest => 0x0d,
        ServerHelloDone => 0x0e,
        CertificateVerify => 0x0f,
        ClientKeyExchange => 0x10,
        Finished => 0x14,
    }
}

enum_builder! {
    /// The `ContentType` TLS protocol enum.  Values in this enum are taken
    /// from the various RFCs covering TLS, and are listed by IANA.
    /// The `Unknown` item is used when processing unrecognized ordinals.
    #[repr(u8)]
    pub enum ContentType {
        ChangeCipherSpec => 0x14,
        Alert => 0x15,
        Handshake => 0x16,
        ApplicationData => 0x17,
        Heartbeat => 0x18,
    }
}

enum_builder! {
    /// The `ProtocolVersion` TLS protocol enum.  Values in this enum are taken
    /// from the various RFCs covering TLS, and are listed by IANA.
    /// The `Unknown` item is used when processing unrecognized ordinals.
    #[repr(u16)]
    pub enum ProtocolVersion {
        SSLv3 => 0x0300,
        TLSv1_0 => 0x0301,
        TLSv1_1 => 0x0302,
        TLSv1_2 => 0x0303,
        DTLSv1_0 => 0xFEFF,
        DTLSv1_2 => 0xFEFD,
    }
}

impl ProtocolVersion {
    /// The major version byte.
    pub fn major(&self) -> u8 {
        (self.get_uint() >> 8) as u8
    }

    /// The minor version byte.
    pub fn minor(&self) -> u8 {
        self.get_uint() as u8
    }

    /// Whether this names a datagram (DTLS) protocol.
    pub fn is_datagram(&self) -> bool {
        self.major() == 0xfe
    }

    /// Whether records under this version carry an explicit per-record IV
    /// when a CBC cipher is in use.  True from TLS1.1 and for every DTLS.
    pub fn supports_explicit_cbc_record_ivs(&self) -> bool {
        self.is_datagram() || self.get_uint() >= 0x0302
    }

    /// The initial record version a handshake uses before any negotiation
    /// has taken place.
    pub(crate) fn initial_record_version(datagram: bool) -> Self {
        match datagram {
            true => Self::DTLSv1_0,
            false => Self::TLSv1_0,
        }
    }

    /// Whether `self` is the same protocol family as `other` and at
    /// least as recent.  DTLS minor versions count downwards.
    pub fn is_at_least(&self, other: Self) -> bool {
        if self.is_datagram() != other.is_datagram() {
            return false;
        }

        match self.is_datagram() {
            true => self.minor() <= other.minor(),
            false => self.get_uint() >= other.get_uint(),
        }
    }
}

enum_builder! {
    /// The `CipherSuite` TLS protocol enum.  Values in this enum are taken
    /// from the various RFCs covering TLS, and are listed by IANA.
    /// The `Unknown` item is used when processing unrecognized ordinals.
    #[repr(u16)]
    pub enum CipherSuite {
        TLS_PSK_WITH_AES_128_GCM_SHA256 => 0x00a8,
        TLS_PSK_WITH_AES_256_GCM_SHA384 => 0x00a9,
        TLS_PSK_WITH_AES_128_CBC_SHA256 => 0x00ae,
        TLS_EMPTY_RENEGOTIATION_INFO_SCSV => 0x00ff,
        TLS_PSK_WITH_CHACHA20_POLY1305_SHA256 => 0xccab,
    }
}

/// The side of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// A client initiates the connection.
    Client,
    /// A server waits for a client to connect.
    Server,
}

impl Side {
    /// The other side.
    pub fn peer(&self) -> Self {
        match self {
            Self::Client => Self::Server,
            Self::Server => Self::Client,
        }
    }
}
