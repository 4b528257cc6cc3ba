#![allow(clippy::upper_case_acronyms)]
#![allow(non_camel_case_types)]
use crate::msgs::codec::{Codec, Reader};

enum_builder! {
    /// The `Compression` TLS protocol enum.  Values in this enum are taken
    /// from the various RFCs covering TLS, and are listed by IANA.
    /// The `Unknown` item is used when processing unrecognized ordinals.
    #[repr(u8)]
    pub enum Compression {
        Null => 0x00,
        Deflate => 0x01,
        LSZ => 0x40,
    }
}

enum_builder! {
    /// The `AlertLevel` TLS protocol enum.  Values in this enum are taken
    /// from the various RFCs covering TLS, and are listed by IANA.
    /// The `Unknown` item is used when processing unrecognized ordinals.
    #[repr(u8)]
    pub enum AlertLevel {
        Warning => 0x01,
        Fatal => 0x02,
    }
}

enum_builder! {
    /// The `HeartbeatMessageType` TLS protocol enum.  Values in this enum are taken
    /// from the various RFCs covering TLS, and are listed by IANA.
    /// The `Unknown` item is used when processing unrecognized ordinals.
    #[repr(u8)]
    pub enum HeartbeatMessageType {
        Request => 0x01,
        Response => 0x02,
    }
}

enum_builder! {
    /// The `HeartbeatMode` TLS protocol enum.  Values in this enum are taken
    /// from the various RFCs covering TLS, and are listed by IANA.
    /// The `Unknown` item is used when processing unrecognized ordinals.
    #[repr(u8)]
    pub enum HeartbeatMode {
        PeerAllowedToSend => 0x01,
        PeerNotAllowedToSend => 0x02,
    }
}

enum_builder! {
    /// The `MaxFragmentLength` TLS protocol enum from RFC 6066.
    /// The `Unknown` item is used when processing unrecognized ordinals.
    #[repr(u8)]
    pub enum MaxFragmentLength {
        Bytes512 => 0x01,
        Bytes1024 => 0x02,
        Bytes2048 => 0x03,
        Bytes4096 => 0x04,
    }
}

impl MaxFragmentLength {
    /// The plaintext fragment size this code stands for.
    pub fn size(&self) -> Option<usize> {
        match self {
            Self::Bytes512 => Some(512),
            Self::Bytes1024 => Some(1024),
            Self::Bytes2048 => Some(2048),
            Self::Bytes4096 => Some(4096),
            Self::Unknown(_) => None,
        }
    }
}

enum_builder! {
    /// The `ExtensionType` TLS protocol enum.  Values in this enum are taken
    /// from the various RFCs covering TLS, and are listed by IANA.
    /// The `Unknown` item is used when processing unrecognized ordinals.
    #[repr(u16)]
    pub enum ExtensionType {
        ServerName => 0x0000,
        MaxFragmentLength => 0x0001,
        Heartbeat => 0x000f,
        ExtendedMasterSecret => 0x0017,
        SessionTicket => 0x0023,
        RenegotiationInfo => 0xff01,
    }
}
