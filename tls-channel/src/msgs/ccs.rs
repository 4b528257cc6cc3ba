use crate::error::InvalidMessage;
use crate::msgs::codec::{Codec, Reader};

/// The one-byte body of a ChangeCipherSpec record.
#[derive(Debug)]
pub struct ChangeCipherSpecPayload;

impl Codec for ChangeCipherSpecPayload {
    fn encode(&self, bytes: &mut Vec<u8>) {
        1u8.encode(bytes);
    }

    fn read(r: &mut Reader) -> Result<Self, InvalidMessage> {
        let typ = u8::read(r).map_err(|_| InvalidMessage::InvalidCcs)?;
        if typ != 1 {
            return Err(InvalidMessage::InvalidCcs);
        }

        r.expect_empty("ChangeCipherSpecPayload")
            .map_err(|_| InvalidMessage::InvalidCcs)
            .map(|_| Self {})
    }
}
