use crate::enums::{AlertDescription, ContentType, HandshakeType, ProtocolVersion};
use crate::rand;

use std::error::Error as StdError;
use std::fmt;
use std::time::SystemTimeError;

/// tls-channel reports protocol and usage errors using this type.
#[non_exhaustive]
#[derive(Debug, PartialEq, Clone)]
pub enum Error {
    /// We received a record that isn't valid right now.
    /// `expect_types` lists the record types we can expect right now.
    /// `got_type` is the type we found.
    InappropriateMessage {
        /// Which types we expected
        expect_types: Vec<ContentType>,
        /// What type we received
        got_type: ContentType,
    },

    /// We received a handshake message that isn't valid right now.
    /// `expect_types` lists the handshake message types we can expect
    /// right now.  `got_type` is the type we found.
    InappropriateHandshakeMessage {
        /// Which handshake type we expected
        expect_types: Vec<HandshakeType>,
        /// What handshake type we received
        got_type: HandshakeType,
    },

    /// The peer sent us a message with invalid contents.
    InvalidMessage(InvalidMessage),

    /// We couldn't decrypt or authenticate a record.  This is invariably
    /// fatal on stream transports.
    DecryptError,

    /// We couldn't encrypt a record.
    EncryptError,

    /// The peer doesn't support a protocol version/feature we require.
    /// The parameter gives a hint as to what version/feature it is.
    PeerIncompatible(PeerIncompatible),

    /// The peer deviated from the standard protocol.
    /// The parameter gives a hint where.
    PeerMisbehaved(PeerMisbehaved),

    /// We received a fatal alert.  This means the peer is unhappy.
    AlertReceived(AlertDescription),

    /// The peer sent a record whose plaintext exceeds the negotiated
    /// maximum fragment size, or whose ciphertext exceeds the protocol
    /// limit.
    PeerSentOversizedRecord,

    /// This function doesn't work until the handshake is complete.
    HandshakeNotComplete,

    /// A new handshake was requested while another one is still pending.
    HandshakeAlreadyPending,

    /// A renegotiation tried to switch between stream and datagram framing.
    TransportMismatch {
        /// The version of the established connection
        active: ProtocolVersion,
        /// The version the new handshake asked for
        requested: ProtocolVersion,
    },

    /// The application declined the session offered by the
    /// `handshake_complete` callback.
    HandshakeVetoed,

    /// The connection has been closed; no further records can be written.
    ConnectionClosed,

    /// A write sequence counter reached its limit.  The connection
    /// must be renegotiated or closed.
    SequenceNumberExhausted,

    /// A record larger than the current maximum fragment size was handed to
    /// the record writer.
    RecordTooLarge {
        /// The record length offered
        len: usize,
        /// The maximum permitted
        max: usize,
    },

    /// We failed to figure out what time it currently is.
    FailedToGetCurrentTime,

    /// We failed to acquire random bytes from the system.
    FailedToGetRandomBytes,

    /// A catch-all error for unlikely errors.
    General(String),
}

/// A corrupt message payload that resulted in an error.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InvalidMessage {
    /// An advertised handshake message was larger than we allow.
    HandshakePayloadTooLarge,
    /// The peer sent us a syntactically incorrect ChangeCipherSpec payload.
    InvalidCcs,
    /// A message was zero-length when its record kind forbids it.
    InvalidEmptyPayload,
    /// A datagram fragment disagreed with a previous fragment of the same message.
    InconsistentFragment,
    /// A heartbeat message was malformed.
    InvalidHeartbeat,
    /// Message is shorter than the expected length
    MessageTooShort,
    /// Missing data for the named payload value
    MissingData(&'static str),
    /// Trailing data found for the named payload value
    TrailingData(&'static str),
    /// A record header named a protocol version framing we don't know,
    /// or one that differs from the connection's transport.
    UnknownProtocolVersion,
}

impl From<InvalidMessage> for Error {
    #[inline]
    fn from(e: InvalidMessage) -> Self {
        Self::InvalidMessage(e)
    }
}

#[non_exhaustive]
#[allow(missing_docs)]
#[derive(Debug, PartialEq, Clone)]
/// The set of cases where we failed to make a connection because we thought
/// the peer was misbehaving.
///
/// This is `non_exhaustive`: we might add or stop using items here in minor
/// versions.
pub enum PeerMisbehaved {
    BadRenegotiationInfo,
    DuplicateClientHelloExtensions,
    DuplicateServerHelloExtensions,
    IncorrectFinished,
    KeyEpochWithPendingFragment,
    RenegotiationChangedVersion,
    SecureRenegotiationChanged,
    SelectedUnofferedCipherSuite,
    SelectedUnofferedCompression,
    SelectedUnofferedMaxFragmentLength,
    UnknownPskIdentity,
    UnsolicitedHeartbeatExtension,
    UnsolicitedServerHelloExtension,
}

impl PeerMisbehaved {
    fn alert(&self) -> AlertDescription {
        match self {
            Self::IncorrectFinished => AlertDescription::DecryptError,
            Self::UnknownPskIdentity => AlertDescription::UnknownPskIdentity,
            Self::RenegotiationChangedVersion => AlertDescription::ProtocolVersion,
            Self::KeyEpochWithPendingFragment => AlertDescription::UnexpectedMessage,
            Self::SelectedUnofferedCompression => AlertDescription::IllegalParameter,
            Self::SelectedUnofferedCipherSuite
            | Self::SelectedUnofferedMaxFragmentLength
            | Self::UnsolicitedHeartbeatExtension
            | Self::UnsolicitedServerHelloExtension => AlertDescription::UnsupportedExtension,
            _ => AlertDescription::HandshakeFailure,
        }
    }
}

impl From<PeerMisbehaved> for Error {
    #[inline]
    fn from(e: PeerMisbehaved) -> Self {
        Self::PeerMisbehaved(e)
    }
}

#[non_exhaustive]
#[allow(missing_docs)]
#[derive(Debug, PartialEq, Clone)]
/// The set of cases where we failed to make a connection because a peer
/// doesn't support a version/feature we require.
///
/// This is `non_exhaustive`: we might add or stop using items here in minor
/// versions.
pub enum PeerIncompatible {
    NoCipherSuitesInCommon,
    NullCompressionRequired,
    SecureRenegotiationRequired,
    Tls12NotOffered,
    UnsupportedVersion(ProtocolVersion),
}

impl From<PeerIncompatible> for Error {
    #[inline]
    fn from(e: PeerIncompatible) -> Self {
        Self::PeerIncompatible(e)
    }
}

impl Error {
    /// The fatal alert to send the peer before this error propagates out of
    /// the receive path, or `None` when the peer caused it by sending an alert
    /// itself.
    pub fn fatal_alert(&self) -> Option<AlertDescription> {
        Some(match self {
            Self::AlertReceived(_) => return None,
            Self::InvalidMessage(_) => AlertDescription::DecodeError,
            Self::InappropriateMessage { .. } | Self::InappropriateHandshakeMessage { .. } => {
                AlertDescription::UnexpectedMessage
            }
            Self::PeerSentOversizedRecord => AlertDescription::RecordOverflow,
            Self::DecryptError => AlertDescription::BadRecordMac,
            Self::PeerMisbehaved(why) => why.alert(),
            Self::PeerIncompatible(PeerIncompatible::UnsupportedVersion(_))
            | Self::PeerIncompatible(PeerIncompatible::Tls12NotOffered) => {
                AlertDescription::ProtocolVersion
            }
            Self::PeerIncompatible(PeerIncompatible::NullCompressionRequired) => {
                AlertDescription::IllegalParameter
            }
            Self::PeerIncompatible(_) | Self::HandshakeVetoed => {
                AlertDescription::HandshakeFailure
            }
            _ => AlertDescription::InternalError,
        })
    }
}

fn join<T: fmt::Debug>(items: &[T]) -> String {
    items
        .iter()
        .map(|x| format!("{:?}", x))
        .collect::<Vec<String>>()
        .join(" or ")
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::InappropriateMessage {
                ref expect_types,
                ref got_type,
            } => write!(
                f,
                "received unexpected message: got {:?} when expecting {}",
                got_type,
                join::<ContentType>(expect_types)
            ),
            Self::InappropriateHandshakeMessage {
                ref expect_types,
                ref got_type,
            } => write!(
                f,
                "received unexpected handshake message: got {:?} when expecting {}",
                got_type,
                join::<HandshakeType>(expect_types)
            ),
            Self::InvalidMessage(ref typ) => {
                write!(f, "received corrupt message of type {:?}", typ)
            }
            Self::PeerIncompatible(ref why) => write!(f, "peer is incompatible: {:?}", why),
            Self::PeerMisbehaved(ref why) => write!(f, "peer misbehaved: {:?}", why),
            Self::AlertReceived(ref alert) => write!(f, "received fatal alert: {:?}", alert),
            Self::DecryptError => write!(f, "cannot decrypt peer's message"),
            Self::EncryptError => write!(f, "cannot encrypt message"),
            Self::PeerSentOversizedRecord => write!(f, "peer sent excess record size"),
            Self::HandshakeNotComplete => write!(f, "handshake not complete"),
            Self::HandshakeAlreadyPending => {
                write!(f, "a handshake is already in progress on this connection")
            }
            Self::TransportMismatch {
                ref active,
                ref requested,
            } => write!(
                f,
                "cannot renegotiate from {:?} to {:?}: transport framing differs",
                active, requested
            ),
            Self::HandshakeVetoed => write!(f, "application rejected the new session"),
            Self::ConnectionClosed => write!(f, "connection is closed"),
            Self::SequenceNumberExhausted => write!(f, "record sequence number exhausted"),
            Self::RecordTooLarge { len, max } => {
                write!(f, "record of {} bytes exceeds maximum fragment size {}", len, max)
            }
            Self::FailedToGetCurrentTime => write!(f, "failed to get current time"),
            Self::FailedToGetRandomBytes => write!(f, "failed to get random bytes"),
            Self::General(ref err) => write!(f, "unexpected error: {}", err),
        }
    }
}

impl From<SystemTimeError> for Error {
    #[inline]
    fn from(_: SystemTimeError) -> Self {
        Self::FailedToGetCurrentTime
    }
}

impl StdError for Error {}

impl From<rand::GetRandomFailed> for Error {
    fn from(_: rand::GetRandomFailed) -> Self {
        Self::FailedToGetRandomBytes
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, InvalidMessage, PeerIncompatible, PeerMisbehaved};
    use crate::enums::{AlertDescription, ContentType, HandshakeType, ProtocolVersion};

    #[test]
    fn smoke() {
        let all = vec![
            Error::InappropriateMessage {
                expect_types: vec![ContentType::Alert],
                got_type: ContentType::Handshake,
            },
            Error::InappropriateHandshakeMessage {
                expect_types: vec![HandshakeType::ClientHello, HandshakeType::Finished],
                got_type: HandshakeType::ServerHello,
            },
            Error::InvalidMessage(InvalidMessage::InvalidCcs),
            Error::DecryptError,
            PeerIncompatible::Tls12NotOffered.into(),
            PeerMisbehaved::BadRenegotiationInfo.into(),
            Error::AlertReceived(AlertDescription::ExportRestriction),
            Error::TransportMismatch {
                active: ProtocolVersion::TLSv1_2,
                requested: ProtocolVersion::DTLSv1_2,
            },
            Error::RecordTooLarge { len: 20, max: 10 },
            Error::General("undocumented error".to_string()),
            Error::FailedToGetRandomBytes,
            Error::HandshakeNotComplete,
            Error::PeerSentOversizedRecord,
        ];

        for err in all {
            println!("{:?}:", err);
            println!("  fmt '{}'", err);
        }
    }

    #[test]
    fn alert_mapping() {
        assert_eq!(
            Error::InvalidMessage(InvalidMessage::MessageTooShort).fatal_alert(),
            Some(AlertDescription::DecodeError)
        );
        assert_eq!(
            Error::PeerSentOversizedRecord.fatal_alert(),
            Some(AlertDescription::RecordOverflow)
        );
        assert_eq!(
            Error::from(PeerMisbehaved::BadRenegotiationInfo).fatal_alert(),
            Some(AlertDescription::HandshakeFailure)
        );
        assert_eq!(
            Error::from(PeerMisbehaved::IncorrectFinished).fatal_alert(),
            Some(AlertDescription::DecryptError)
        );
        assert_eq!(
            Error::InappropriateMessage {
                expect_types: vec![],
                got_type: ContentType::Unknown(99),
            }
            .fatal_alert(),
            Some(AlertDescription::UnexpectedMessage)
        );
        assert_eq!(
            Error::AlertReceived(AlertDescription::HandshakeFailure).fatal_alert(),
            None
        );
        assert_eq!(
            Error::General("x".into()).fatal_alert(),
            Some(AlertDescription::InternalError)
        );
    }

    #[test]
    fn rand_error_mapping() {
        use super::rand;
        let err: Error = rand::GetRandomFailed.into();
        assert_eq!(err, Error::FailedToGetRandomBytes);
    }

    #[test]
    fn time_error_mapping() {
        use std::time::SystemTime;

        let time_error = SystemTime::UNIX_EPOCH
            .duration_since(SystemTime::now())
            .unwrap_err();
        let err: Error = time_error.into();
        assert_eq!(err, Error::FailedToGetCurrentTime);
    }
}
