use crate::error::InvalidMessage;
use crate::msgs::codec::{Codec, Reader};
use crate::msgs::enums::HeartbeatMessageType;

/// RFC 6520 requires at least this much padding after the payload.
pub(crate) const MIN_PADDING: usize = 16;

#[derive(Debug, Clone)]
pub struct HeartbeatPayload {
    pub typ: HeartbeatMessageType,
    pub payload: Vec<u8>,
    pub padding: Vec<u8>,
}

impl HeartbeatPayload {
    pub(crate) fn request(payload: &[u8], padding: Vec<u8>) -> Self {
        Self {
            typ: HeartbeatMessageType::Request,
            payload: payload.to_vec(),
            padding,
        }
    }

    pub(crate) fn response(payload: Vec<u8>, padding: Vec<u8>) -> Self {
        Self {
            typ: HeartbeatMessageType::Response,
            payload,
            padding,
        }
    }
}

impl Codec for HeartbeatPayload {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.typ.encode(bytes);
        (self.payload.len() as u16).encode(bytes);
        bytes.extend_from_slice(&self.payload);
        bytes.extend_from_slice(&self.padding);
    }

    /// The declared payload length must leave room for the minimum padding
    /// within the record; anything else is malformed.
    fn read(r: &mut Reader) -> Result<Self, InvalidMessage> {
        let typ = HeartbeatMessageType::read(r)?;
        let len = u16::read(r)? as usize;
        if r.left() < len + MIN_PADDING {
            return Err(InvalidMessage::InvalidHeartbeat);
        }

        let payload = r
            .take(len)
            .ok_or(InvalidMessage::InvalidHeartbeat)?
            .to_vec();
        let padding = r.rest().to_vec();

        Ok(Self {
            typ,
            payload,
            padding,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overstated_length_is_rejected() {
        // claims 0x4000 bytes of payload but carries 20
        let mut bytes = vec![0x01, 0x40, 0x00];
        bytes.extend_from_slice(&[0u8; 20]);
        assert_eq!(
            HeartbeatPayload::read_bytes(&bytes).unwrap_err(),
            InvalidMessage::InvalidHeartbeat
        );
    }

    #[test]
    fn padding_is_required() {
        let mut bytes = vec![0x01, 0x00, 0x04, 1, 2, 3, 4];
        bytes.extend_from_slice(&[0u8; 15]);
        assert!(HeartbeatPayload::read_bytes(&bytes).is_err());

        bytes.push(0);
        let hb = HeartbeatPayload::read_bytes(&bytes).unwrap();
        assert_eq!(hb.typ, HeartbeatMessageType::Request);
        assert_eq!(hb.payload, vec![1, 2, 3, 4]);
        assert_eq!(hb.padding.len(), MIN_PADDING);
    }
}
