use crate::enums::{ContentType, HandshakeType};
use crate::error::Error;
use crate::handshake::Incoming;
use crate::log::warn;
use crate::msgs::handshake::HandshakeMessagePayload;

/// For an `Incoming` $m, and a HandshakePayload enum member $payload_type,
/// return Ok(payload) if $m is both a handshake message and one that
/// has the given $payload_type.  If not, return Err(Error) quoting
/// $handshake_type as the expected handshake type.
macro_rules! require_handshake_msg(
  ( $m:expr, $handshake_type:path, $payload_type:path ) => (
    match &$m {
        $crate::handshake::Incoming::Handshake { payload: hsp, .. } => match &hsp.payload {
            $payload_type(hm) => Ok(hm),
            _ => Err($crate::check::inappropriate_handshake_message(
                     hsp, &[$handshake_type]))
        }
        m => Err($crate::check::inappropriate_message(
            m,
            &[$crate::enums::ContentType::Handshake],
        )),
    }
  )
);

pub(crate) fn inappropriate_message(m: &Incoming, content_types: &[ContentType]) -> Error {
    warn!(
        "Received a {:?} message while expecting {:?}",
        m.content_type(),
        content_types
    );
    Error::InappropriateMessage {
        expect_types: content_types.to_vec(),
        got_type: m.content_type(),
    }
}

pub(crate) fn inappropriate_handshake_message(
    hsp: &HandshakeMessagePayload,
    handshake_types: &[HandshakeType],
) -> Error {
    warn!(
        "Received a {:?} handshake message while expecting {:?}",
        hsp.typ, handshake_types
    );
    Error::InappropriateHandshakeMessage {
        expect_types: handshake_types.to_vec(),
        got_type: hsp.typ,
    }
}
