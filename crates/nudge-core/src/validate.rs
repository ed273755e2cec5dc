//! Identifier rules for user-agent and channel identifiers.

use crate::error::{PushError, PushResult};

/// Maximum UAID length in bytes.
pub const UAID_MAX_LEN: usize = 100;
/// Maximum ChannelID length in bytes.
pub const CHID_MAX_LEN: usize = 100;

/// UAID content is opaque; only the length is bounded. Empty is allowed and
/// means the server mints one.
pub fn check_uaid(uaid: &str) -> PushResult<()> {
    if uaid.len() > UAID_MAX_LEN {
        return Err(PushError::InvalidData);
    }
    Ok(())
}

/// ChannelIDs are bounded and restricted to `[0-9a-z_-]` on the lower-cased
/// form.
pub fn check_channel_id(channel_id: &str) -> PushResult<()> {
    if channel_id.is_empty() || channel_id.len() > CHID_MAX_LEN {
        return Err(PushError::InvalidData);
    }
    if !channel_id.to_lowercase().chars().all(is_channel_char) {
        return Err(PushError::InvalidData);
    }
    Ok(())
}

fn is_channel_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-'
}
