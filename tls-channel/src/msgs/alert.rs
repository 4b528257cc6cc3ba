use crate::enums::AlertDescription;
use crate::error::InvalidMessage;
use crate::msgs::codec::{Codec, Reader};
use crate::msgs::enums::AlertLevel;

/// An alert: a level plus a description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alert {
    /// Whether the alert terminates the connection.
    pub level: AlertLevel,
    /// What the alert is about.
    pub description: AlertDescription,
}

impl Alert {
    /// A warning-level alert.
    pub fn warning(description: AlertDescription) -> Self {
        Self {
            level: AlertLevel::Warning,
            description,
        }
    }

    /// A fatal alert.
    pub fn fatal(description: AlertDescription) -> Self {
        Self {
            level: AlertLevel::Fatal,
            description,
        }
    }

    /// Unknown levels are treated as fatal.
    pub fn is_fatal(&self) -> bool {
        self.level != AlertLevel::Warning
    }

    /// Whether this alert can be put on the wire.
    pub fn is_valid(&self) -> bool {
        !matches!(self.level, AlertLevel::Unknown(_))
            && !matches!(self.description, AlertDescription::Unknown(_))
    }
}

impl Codec for Alert {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.level.encode(bytes);
        self.description.encode(bytes);
    }

    fn read(r: &mut Reader) -> Result<Self, InvalidMessage> {
        let level = AlertLevel::read(r)?;
        let description = AlertDescription::read(r)?;
        r.expect_empty("Alert")
            .map(|_| Self { level, description })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_wire_form() {
        let alert = Alert::fatal(AlertDescription::HandshakeFailure);
        assert_eq!(alert.get_encoding(), vec![0x02, 0x28]);
        assert!(alert.is_fatal());
        assert!(!Alert::warning(AlertDescription::CloseNotify).is_fatal());
    }

    #[test]
    fn alert_rejects_trailing_bytes() {
        assert_eq!(
            Alert::read_bytes(&[1, 0, 0]).unwrap_err(),
            InvalidMessage::TrailingData("Alert")
        );
        assert_eq!(
            Alert::read_bytes(&[1]).unwrap_err(),
            InvalidMessage::MissingData("AlertDescription")
        );
    }

    #[test]
    fn unknown_level_is_fatal_but_not_sendable() {
        let alert = Alert::read_bytes(&[9, 0]).unwrap();
        assert!(alert.is_fatal());
        assert!(!alert.is_valid());
    }
}
