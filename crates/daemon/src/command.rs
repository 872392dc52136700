//! The command subchannel: inbound frames with no state and a populated
//! command map, dispatched by request key.

use std::collections::BTreeMap;

use thiserror::Error;

/// Key holding the request name.
pub(crate) const REQ_KEY: &str = "REQ";
/// Key holding the channel argument.
pub(crate) const CHANNEL_KEY: &str = "CHANNEL";

pub(crate) const REQ_SUBSCRIBE: &str = "SUBSCRIBE";
pub(crate) const REQ_CREATE_CHANNEL: &str = "CREATE_CHANNEL";
pub(crate) const REQ_LIST_CHANNELS: &str = "LIST_CHANNELS";
pub(crate) const REQ_LIST_FILES: &str = "LIST_FILES";
pub(crate) const REQ_CID: &str = "CID";
pub(crate) const REQ_CONNECTED_USERS: &str = "CONNECTED_USERS";
pub(crate) const REQ_SUBSCRIBE_CONNECTED_USERS: &str = "SUBSCRIBE_TO_LIST_CONNECTED_USERS";

/// Errors parsing a command map.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub(crate) enum CommandError {
    #[error("invalid command request")]
    InvalidRequest,
    #[error("missing CHANNEL value")]
    MissingChannel,
}

/// A parsed command request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CommandRequest {
    /// Bind the connection's subscription to a channel.
    Subscribe { channel: String },
    /// Ensure a channel directory exists.
    CreateChannel { channel: String },
    /// Enumerate the channels under the storage root.
    ListChannels,
    /// Enumerate the direct children of a channel.
    ListFiles { channel: String },
    /// Return the assigned client ID.
    Cid,
    /// One-shot connected-user list.
    ConnectedUsers,
    /// Connected-user list on every hub membership change.
    SubscribeConnectedUsers,
}

impl CommandRequest {
    pub(crate) fn parse(command: &BTreeMap<String, String>) -> Result<Self, CommandError> {
        let req = command
            .get(REQ_KEY)
            .map(String::as_str)
            .ok_or(CommandError::InvalidRequest)?;
        match req {
            REQ_SUBSCRIBE => Ok(Self::Subscribe {
                channel: required_channel(command)?,
            }),
            REQ_CREATE_CHANNEL => Ok(Self::CreateChannel {
                channel: required_channel(command)?,
            }),
            REQ_LIST_CHANNELS => Ok(Self::ListChannels),
            REQ_LIST_FILES => Ok(Self::ListFiles {
                channel: required_channel(command)?,
            }),
            REQ_CID => Ok(Self::Cid),
            REQ_CONNECTED_USERS => Ok(Self::ConnectedUsers),
            REQ_SUBSCRIBE_CONNECTED_USERS => Ok(Self::SubscribeConnectedUsers),
            _ => Err(CommandError::InvalidRequest),
        }
    }
}

fn required_channel(command: &BTreeMap<String, String>) -> Result<String, CommandError> {
    command
        .get(CHANNEL_KEY)
        .filter(|channel| !channel.is_empty())
        .cloned()
        .ok_or(CommandError::MissingChannel)
}
