use crate::error::Error;
use crate::msgs::codec::u48;

use std::collections::BTreeMap;

/// Counters refuse to go past this: they must never wrap.
const SEQ_HARD_LIMIT: u64 = 0xffff_ffff_ffff_fffe;

/// Width of the datagram replay window, in records.
const WINDOW_SIZE: u64 = 64;

/// Per-direction record sequence numbers for one connection.
///
/// Created with the first handshake and kept for the life of the
/// connection; each change_cipher_spec advances the epoch of its direction.
#[derive(Debug)]
pub(crate) enum SequenceNumbers {
    Stream(StreamSequenceNumbers),
    Datagram(DatagramSequenceNumbers),
}

impl SequenceNumbers {
    pub(crate) fn new(datagram: bool) -> Self {
        match datagram {
            true => Self::Datagram(DatagramSequenceNumbers::new()),
            false => Self::Stream(StreamSequenceNumbers::default()),
        }
    }

    pub(crate) fn is_datagram(&self) -> bool {
        matches!(self, Self::Datagram(_))
    }

    /// Move reading to the next epoch.  Fails once the epoch counter is
    /// used up.
    pub(crate) fn new_read_cipher_state(&mut self) -> Result<(), Error> {
        match self {
            Self::Stream(s) => {
                s.read_epoch = next_epoch(s.read_epoch)?;
                s.read_seq = 0;
            }
            Self::Datagram(d) => {
                d.read_epoch = next_epoch(d.read_epoch)?;
                d.window = ReplayWindow::default();
            }
        }
        Ok(())
    }

    pub(crate) fn new_write_cipher_state(&mut self) -> Result<(), Error> {
        match self {
            Self::Stream(s) => {
                s.write_epoch = next_epoch(s.write_epoch)?;
                s.write_seq = 0;
            }
            Self::Datagram(d) => {
                d.write_epoch = next_epoch(d.write_epoch)?;
                d.write_seqs.insert(d.write_epoch, 0);
                // a flight is only ever retransmitted under the epoch
                // immediately before the current one
                let keep_from = d.write_epoch.saturating_sub(1);
                d.write_seqs.retain(|epoch, _| *epoch >= keep_from);
            }
        }
        Ok(())
    }

    pub(crate) fn current_read_epoch(&self) -> u16 {
        match self {
            Self::Stream(s) => s.read_epoch,
            Self::Datagram(d) => d.read_epoch,
        }
    }

    pub(crate) fn current_write_epoch(&self) -> u16 {
        match self {
            Self::Stream(s) => s.write_epoch,
            Self::Datagram(d) => d.write_epoch,
        }
    }

    /// Allocate the sequence number for the next record written under
    /// `epoch`.  For datagrams the epoch occupies the top 16 bits.
    pub(crate) fn next_write_sequence(&mut self, epoch: u16) -> Result<u64, Error> {
        match self {
            Self::Stream(s) => {
                if s.write_seq >= SEQ_HARD_LIMIT {
                    return Err(Error::SequenceNumberExhausted);
                }
                let seq = s.write_seq;
                s.write_seq += 1;
                Ok(seq)
            }
            Self::Datagram(d) => {
                let counter = d
                    .write_seqs
                    .get_mut(&epoch)
                    .ok_or_else(|| Error::General(format!("no write state for epoch {}", epoch)))?;
                if *counter >= u48::MAX {
                    return Err(Error::SequenceNumberExhausted);
                }
                let seq = *counter;
                *counter += 1;
                Ok((u64::from(epoch) << 48) | seq)
            }
        }
    }

    /// The sequence number the next stream record is read under.
    /// Datagram records carry their own.
    pub(crate) fn next_read_sequence(&self) -> Result<u64, Error> {
        match self {
            Self::Stream(s) if s.read_seq >= SEQ_HARD_LIMIT => {
                Err(Error::SequenceNumberExhausted)
            }
            Self::Stream(s) => Ok(s.read_seq),
            Self::Datagram(_) => Ok(0),
        }
    }

    /// Whether `seq` is a datagram replay, or too old for the window.
    pub(crate) fn already_seen(&self, seq: u64) -> bool {
        match self {
            Self::Stream(_) => false,
            Self::Datagram(d) => {
                if (seq >> 48) as u16 != d.read_epoch {
                    return false;
                }
                d.window.already_seen(seq & u48::MAX)
            }
        }
    }

    /// Record that `seq` was received and authenticated.  Calling this
    /// twice for the same record is harmless.
    pub(crate) fn read_accept(&mut self, seq: u64) {
        match self {
            Self::Stream(s) => {
                s.read_seq = s.read_seq.max(seq.saturating_add(1));
            }
            Self::Datagram(d) => {
                if (seq >> 48) as u16 == d.read_epoch {
                    d.window.accept(seq & u48::MAX);
                }
            }
        }
    }
}

fn next_epoch(epoch: u16) -> Result<u16, Error> {
    epoch
        .checked_add(1)
        .ok_or(Error::SequenceNumberExhausted)
}

#[derive(Debug, Default)]
pub(crate) struct StreamSequenceNumbers {
    read_seq: u64,
    write_seq: u64,
    read_epoch: u16,
    write_epoch: u16,
}

#[derive(Debug)]
pub(crate) struct DatagramSequenceNumbers {
    /// Next sequence number per write epoch still in use.
    write_seqs: BTreeMap<u16, u64>,
    write_epoch: u16,
    read_epoch: u16,
    window: ReplayWindow,
}

impl DatagramSequenceNumbers {
    fn new() -> Self {
        let mut write_seqs = BTreeMap::new();
        write_seqs.insert(0, 0);
        Self {
            write_seqs,
            write_epoch: 0,
            read_epoch: 0,
            window: ReplayWindow::default(),
        }
    }
}

/// A sliding window over the most recent 64 sequence numbers of the
/// current read epoch.  Bit `n` of `bits` is set when `highest - n` has
/// been received.
#[derive(Debug, Default)]
struct ReplayWindow {
    highest: Option<u64>,
    bits: u64,
}

impl ReplayWindow {
    fn already_seen(&self, seq: u64) -> bool {
        let highest = match self.highest {
            Some(highest) => highest,
            None => return false,
        };

        if seq > highest {
            return false;
        }

        let offset = highest - seq;
        if offset >= WINDOW_SIZE {
            return true;
        }

        self.bits & (1 << offset) != 0
    }

    fn accept(&mut self, seq: u64) {
        let highest = match self.highest {
            Some(highest) => highest,
            None => {
                self.highest = Some(seq);
                self.bits = 1;
                return;
            }
        };

        if seq > highest {
            let shift = seq - highest;
            self.bits = match shift >= WINDOW_SIZE {
                true => 0,
                false => self.bits << shift,
            };
            self.bits |= 1;
            self.highest = Some(seq);
        } else if highest - seq < WINDOW_SIZE {
            self.bits |= 1 << (highest - seq);
        }
    }
}
