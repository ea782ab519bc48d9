//! Vocabulary of the single-byte launch synchronization protocol.

use std::convert::TryFrom;
use std::fmt;

use anyhow::bail;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SyncMessage {
    /// child → supervisor: map my uids and gids before I go on.
    RequestConfigureUserNamespace = 0x00,
    /// supervisor → child: mappings (and cgroup) are in place.
    UserNamespaceConfigured = 0x01,
    /// supervisor → child: prestart hooks finished.
    PrestartHooksExecuted = 0x02,
    /// supervisor → child: create-runtime hooks finished.
    CreateRuntimeHooksExecuted = 0x03,
    /// child → supervisor: create-container hooks finished.
    CreateContainerHooksExecuted = 0x04,
}

impl TryFrom<u8> for SyncMessage {
    type Error = anyhow::Error;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Ok(match byte {
            0x00 => SyncMessage::RequestConfigureUserNamespace,
            0x01 => SyncMessage::UserNamespaceConfigured,
            0x02 => SyncMessage::PrestartHooksExecuted,
            0x03 => SyncMessage::CreateRuntimeHooksExecuted,
            0x04 => SyncMessage::CreateContainerHooksExecuted,
            unknown => bail!("unknown sync message {:#04x}", unknown),
        })
    }
}

impl fmt::Display for SyncMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncMessage::RequestConfigureUserNamespace => "REQUEST_CONFIGURE_USER_NAMESPACE",
            SyncMessage::UserNamespaceConfigured => "USER_NAMESPACE_CONFIGURED",
            SyncMessage::PrestartHooksExecuted => "PRESTART_HOOKS_EXECUTED",
            SyncMessage::CreateRuntimeHooksExecuted => "CREATE_RUNTIME_HOOKS_EXECUTED",
            SyncMessage::CreateContainerHooksExecuted => "CREATE_CONTAINER_HOOKS_EXECUTED",
        };
        name.fmt(f)
    }
}

/// A byte arrived out of protocol order. Unrecoverable; the launch fails.
#[derive(Debug)]
pub struct UnexpectedMessage {
    pub expected: SyncMessage,
    pub actual: SyncMessage,
}

impl std::error::Error for UnexpectedMessage {}

impl fmt::Display for UnexpectedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unexpected sync message: expected {} got {}",
            self.expected, self.actual
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        for &message in &[
            SyncMessage::RequestConfigureUserNamespace,
            SyncMessage::UserNamespaceConfigured,
            SyncMessage::PrestartHooksExecuted,
            SyncMessage::CreateRuntimeHooksExecuted,
            SyncMessage::CreateContainerHooksExecuted,
        ] {
            assert_eq!(SyncMessage::try_from(message as u8).unwrap(), message);
        }
    }

    #[test]
    fn test_unknown_byte_is_rejected() {
        assert!(SyncMessage::try_from(0x05).is_err());
        assert!(SyncMessage::try_from(0xff).is_err());
    }

    #[test]
    fn test_unexpected_message_names_both_sides() {
        let err = UnexpectedMessage {
            expected: SyncMessage::UserNamespaceConfigured,
            actual: SyncMessage::PrestartHooksExecuted,
        };
        let message = err.to_string();
        assert!(message.contains("USER_NAMESPACE_CONFIGURED"));
        assert!(message.contains("PRESTART_HOOKS_EXECUTED"));
    }
}
