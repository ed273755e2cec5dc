use thiserror::Error;

/// Errors produced by the push protocol layer.
#[derive(Debug, Error)]
pub enum PushError {
    #[error("unknown command")]
    UnknownCommand,

    #[error("invalid command")]
    InvalidCommand,

    #[error("missing required fields for command")]
    MissingData,

    #[error("invalid data")]
    InvalidData,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("{0}")]
    Other(String),
}

impl PushError {
    /// HTTP-like status plus the canonical client-facing error string for
    /// an error reply. Protocol faults are the client's doing (401); storage
    /// and transport failures are ours (500).
    pub fn to_status(&self) -> (u32, &'static str) {
        match self {
            PushError::UnknownCommand => (401, "Unknown Command"),
            PushError::InvalidCommand => (401, "Invalid Command"),
            PushError::MissingData => (401, "Missing Required Fields"),
            PushError::InvalidData => (401, "An Invalid Value Was Specified"),
            PushError::Storage(_) => (500, "Storage Error"),
            PushError::Transport(_) => (500, "Transport Error"),
            PushError::Other(_) => (500, "Internal Error"),
        }
    }

    /// Transport failures tear the session down; every other error is
    /// reported to the client and the session continues.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PushError::Transport(_))
    }
}

pub type PushResult<T> = Result<T, PushError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_faults_map_to_401() {
        for err in [
            PushError::UnknownCommand,
            PushError::InvalidCommand,
            PushError::MissingData,
            PushError::InvalidData,
        ] {
            let (status, message) = err.to_status();
            assert_eq!(status, 401, "{err}");
            assert!(!message.is_empty());
        }
    }

    #[test]
    fn server_faults_map_to_500() {
        let (status, _) = PushError::Storage("down".into()).to_status();
        assert_eq!(status, 500);
        let (status, _) = PushError::Transport("broken pipe".into()).to_status();
        assert_eq!(status, 500);
    }

    #[test]
    fn only_transport_is_fatal() {
        assert!(PushError::Transport("gone".into()).is_fatal());
        assert!(!PushError::Storage("down".into()).is_fatal());
        assert!(!PushError::InvalidCommand.is_fatal());
    }
}
