use crate::enums::{ContentType, ProtocolVersion};
use crate::msgs::message::BorrowedPlainMessage;

pub(crate) const MAX_FRAGMENT_LEN: usize = 16384;

/// The negotiated maximum fragment may not go below this.
pub(crate) const MIN_FRAGMENT_LEN: usize = 128;

pub(crate) struct MessageFragmenter {
    max_frag: usize,
}

impl Default for MessageFragmenter {
    fn default() -> Self {
        Self {
            max_frag: MAX_FRAGMENT_LEN,
        }
    }
}

impl MessageFragmenter {
    /// Split (typ, version, payload) into borrowed fragments no longer
    /// than the maximum fragment size.
    pub(crate) fn fragment_slice<'a>(
        &self,
        typ: ContentType,
        version: ProtocolVersion,
        payload: &'a [u8],
    ) -> impl Iterator<Item = BorrowedPlainMessage<'a>> + 'a {
        payload
            .chunks(self.max_frag)
            .map(move |c| BorrowedPlainMessage {
                typ,
                version,
                payload: c,
            })
    }

    /// Set the maximum plaintext fragment size.
    ///
    /// Zero selects the protocol maximum of 16384 bytes; anything else is
    /// clamped into `128..=16384`.
    pub(crate) fn set_max_fragment_size(&mut self, max_fragment_size: usize) {
        self.max_frag = match max_fragment_size {
            0 => MAX_FRAGMENT_LEN,
            sz => sz.clamp(MIN_FRAGMENT_LEN, MAX_FRAGMENT_LEN),
        };
    }

    pub(crate) fn max_fragment_size(&self) -> usize {
        self.max_frag
    }
}
