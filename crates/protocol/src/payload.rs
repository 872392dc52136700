//! Typed payload variants carried inside the opaque `Data` envelope of a
//! control frame, plus the transfer [`Action`] and [`Channel`] identifiers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use fs::{Directory, FileInfo, Path, PathError};

/// The channel clients fall back to when none is chosen.
pub const DEF_CHANNEL: &str = "main";

/// The two directions a transfer can take.
///
/// Serialized as the integer the original wire format uses: 0 upload,
/// 1 download.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Action {
    #[default]
    Upload,
    Download,
}

/// Error mapping a wire integer to an [`Action`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid action: {0}")]
pub struct ParseActionError(u8);

impl From<Action> for u8 {
    fn from(action: Action) -> Self {
        match action {
            Action::Upload => 0,
            Action::Download => 1,
        }
    }
}

impl TryFrom<u8> for Action {
    type Error = ParseActionError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Action::Upload),
            1 => Ok(Action::Download),
            other => Err(ParseActionError(other)),
        }
    }
}

/// A named logical namespace, materialized as a direct subdirectory of the
/// storage root.
///
/// Deserialization is lenient; [`Channel::to_directory`] enforces that the
/// name is a single valid path component before it reaches the file system.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    #[serde(rename = "Name", default)]
    name: String,
}

impl Channel {
    /// Builds a channel, validating the name as a single path component.
    pub fn new(name: impl Into<String>) -> Result<Self, PathError> {
        let name = name.into();
        Path::from_tokens([name.as_str()])?;
        Ok(Self { name })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The directory this channel occupies under the storage root.
    pub fn to_directory(&self) -> Result<Directory, PathError> {
        if self.name.is_empty() {
            return Err(PathError::InvalidPath(self.name.clone()));
        }
        Ok(Directory::new(Path::from_tokens([self.name.as_str()])?))
    }
}

/// Opens a transfer: the action, the target file (with declared size for
/// uploads), and the channel it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartPayload {
    #[serde(rename = "Action", default)]
    pub action: Action,
    #[serde(flatten)]
    pub info: FileInfo,
    #[serde(rename = "Channel", default)]
    pub channel: Channel,
}

/// Announces a download stream: the file and its size on the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamPayload {
    #[serde(flatten)]
    pub info: FileInfo,
}

/// Broadcast notification that the store changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatePayload {
    #[serde(rename = "Change", default)]
    pub change: bool,
}

/// Terminal failure description sent with an `ERROR` state frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    #[serde(rename = "Message", default)]
    pub message: String,
}
