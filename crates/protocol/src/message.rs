//! The framed control unit exchanged on the wire.
//!
//! A [`Message`] is one newline-delimited JSON object. Field names are
//! case-preserved (`State`, `Response`, `Command`, `Data`) for compatibility
//! with existing clients; `Data` is a base64 envelope around a further JSON
//! payload variant. Unknown fields are ignored and missing fields take their
//! zero values, matching the original decoder's behavior.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use fs::FileInfo;

use crate::error::ProtocolError;
use crate::payload::{ErrorPayload, StartPayload, StreamPayload, UpdatePayload};
use crate::state::State;

/// Response discriminator carried by control frames.
///
/// Serialized as the integer enum the original wire format uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Response {
    #[default]
    Connect,
    Quit,
    Update,
    Ok,
}

/// Error mapping a wire integer to a [`Response`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid response value: {0}")]
pub struct ParseResponseError(u8);

impl From<Response> for u8 {
    fn from(response: Response) -> Self {
        match response {
            Response::Connect => 0,
            Response::Quit => 1,
            Response::Update => 2,
            Response::Ok => 3,
        }
    }
}

impl TryFrom<u8> for Response {
    type Error = ParseResponseError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Response::Connect),
            1 => Ok(Response::Quit),
            2 => Ok(Response::Update),
            3 => Ok(Response::Ok),
            other => Err(ParseResponseError(other)),
        }
    }
}

/// One control frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "State", with = "state_field", default)]
    state: Option<State>,
    #[serde(rename = "Response", default)]
    response: Response,
    #[serde(rename = "Command", default)]
    command: Option<BTreeMap<String, String>>,
    #[serde(rename = "Data", with = "data_field", default)]
    data: Option<Vec<u8>>,
}

impl Message {
    /// A frame carrying only a state.
    #[must_use]
    pub fn with_state(state: State) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }

    /// A client-initiated quit frame.
    #[must_use]
    pub fn quit() -> Self {
        Self {
            response: Response::Quit,
            ..Self::default()
        }
    }

    /// An `ERROR` state frame with a descriptive payload.
    pub fn error_state(message: &str) -> Result<Self, ProtocolError> {
        Self::with_payload(
            State::Error,
            &ErrorPayload {
                message: message.to_owned(),
            },
        )
    }

    /// A `START` frame opening a transfer.
    pub fn start(payload: &StartPayload) -> Result<Self, ProtocolError> {
        Self::with_payload(State::Start, payload)
    }

    /// A `STREAM` frame announcing a download of the given file.
    pub fn stream_start(info: FileInfo) -> Result<Self, ProtocolError> {
        Self::with_payload(State::Stream, &StreamPayload { info })
    }

    /// A broadcast update notification.
    pub fn update(change: bool) -> Result<Self, ProtocolError> {
        Ok(Self {
            response: Response::Update,
            data: Some(serde_json::to_vec(&UpdatePayload { change })?),
            ..Self::default()
        })
    }

    /// A command request frame (client side and tests).
    #[must_use]
    pub fn command(command: BTreeMap<String, String>) -> Self {
        Self {
            command: Some(command),
            ..Self::default()
        }
    }

    /// An `Ok` response to a command, echoing the request key and carrying a
    /// result payload string.
    #[must_use]
    pub fn command_response(req: &str, payload: impl Into<String>) -> Self {
        let mut command = BTreeMap::new();
        command.insert(String::from("REQ"), req.to_owned());
        command.insert(String::from("PAYLOAD"), payload.into());
        Self {
            response: Response::Ok,
            command: Some(command),
            ..Self::default()
        }
    }

    fn with_payload<P: Serialize>(state: State, payload: &P) -> Result<Self, ProtocolError> {
        Ok(Self {
            state: Some(state),
            data: Some(serde_json::to_vec(payload)?),
            ..Self::default()
        })
    }

    #[must_use]
    pub fn state(&self) -> Option<State> {
        self.state
    }

    #[must_use]
    pub fn response(&self) -> Response {
        self.response
    }

    #[must_use]
    pub fn command_map(&self) -> Option<&BTreeMap<String, String>> {
        self.command.as_ref()
    }

    /// Whether the frame carries a non-empty command map.
    #[must_use]
    pub fn has_command(&self) -> bool {
        self.command.as_ref().is_some_and(|map| !map.is_empty())
    }

    #[must_use]
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    /// Decodes the payload as a [`StartPayload`].
    pub fn start_payload(&self) -> Result<StartPayload, ProtocolError> {
        self.decode_payload()
    }

    /// Decodes the payload as a [`StreamPayload`].
    pub fn stream_payload(&self) -> Result<StreamPayload, ProtocolError> {
        self.decode_payload()
    }

    /// Decodes the payload as an [`UpdatePayload`].
    pub fn update_payload(&self) -> Result<UpdatePayload, ProtocolError> {
        self.decode_payload()
    }

    /// Decodes the payload as an [`ErrorPayload`].
    pub fn error_payload(&self) -> Result<ErrorPayload, ProtocolError> {
        self.decode_payload()
    }

    fn decode_payload<P: for<'de> Deserialize<'de>>(&self) -> Result<P, ProtocolError> {
        let data = self.data.as_deref().ok_or(ProtocolError::MissingPayload)?;
        Ok(serde_json::from_slice(data)?)
    }
}

/// `State` on the wire: a string, empty when absent, case-insensitive on
/// input.
mod state_field {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::state::State;

    pub fn serialize<S: Serializer>(state: &Option<State>, serializer: S) -> Result<S::Ok, S::Error> {
        match state {
            Some(state) => serializer.serialize_str(state.as_str()),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<State>, D::Error> {
        let value = Option::<String>::deserialize(deserializer)?;
        match value.as_deref() {
            None | Some("") => Ok(None),
            Some(text) => text.parse().map(Some).map_err(D::Error::custom),
        }
    }
}

/// `Data` on the wire: base64-encoded payload bytes, or null when absent.
mod data_field {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        data: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match data {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let value = Option::<String>::deserialize(deserializer)?;
        match value {
            None => Ok(None),
            Some(text) => STANDARD.decode(text).map(Some).map_err(D::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{Action, Channel};
    use fs::File;

    #[test]
    fn state_frame_serializes_all_fields() {
        let json = serde_json::to_string(&Message::with_state(State::Data)).expect("serialize");
        assert_eq!(json, r#"{"State":"DATA","Response":0,"Command":null,"Data":null}"#);
    }

    #[test]
    fn missing_fields_take_zero_values() {
        let message: Message = serde_json::from_str("{}").expect("deserialize");
        assert_eq!(message.state(), None);
        assert_eq!(message.response(), Response::Connect);
        assert!(!message.has_command());
        assert!(message.data().is_none());
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let message: Message =
            serde_json::from_str(r#"{"State":"DONE","Extra":42}"#).expect("deserialize");
        assert_eq!(message.state(), Some(State::Done));
    }

    #[test]
    fn lowercase_states_are_accepted_on_input() {
        let message: Message = serde_json::from_str(r#"{"State":"eof"}"#).expect("deserialize");
        assert_eq!(message.state(), Some(State::Eof));
    }

    #[test]
    fn data_round_trips_through_base64() {
        let payload = StartPayload {
            action: Action::Upload,
            info: FileInfo::new(File::from_value("a.bin").expect("file"), 11),
            channel: Channel::new("test").expect("channel"),
        };
        let message = Message::start(&payload).expect("start frame");
        let json = serde_json::to_string(&message).expect("serialize");

        let decoded: Message = serde_json::from_str(&json).expect("deserialize");
        let restored = decoded.start_payload().expect("payload");
        assert_eq!(restored.action, Action::Upload);
        assert_eq!(restored.info.file.value(), "a.bin");
        assert_eq!(restored.info.size, 11);
        assert_eq!(restored.channel.name(), "test");
    }

    #[test]
    fn data_is_a_base64_string_on_the_wire() {
        let message = Message::update(true).expect("update frame");
        let value = serde_json::to_value(&message).expect("serialize");
        let encoded = value["Data"].as_str().expect("base64 string");
        use base64::{engine::general_purpose::STANDARD, Engine as _};
        let inner = STANDARD.decode(encoded).expect("decode");
        assert_eq!(inner, br#"{"Change":true}"#);
    }

    #[test]
    fn error_state_carries_the_message() {
        let message = Message::error_state("file sent is empty").expect("error frame");
        assert_eq!(message.state(), Some(State::Error));
        let payload = message.error_payload().expect("payload");
        assert_eq!(payload.message, "file sent is empty");
    }

    #[test]
    fn payload_accessor_without_data_fails() {
        let message = Message::with_state(State::Start);
        assert!(matches!(
            message.start_payload(),
            Err(ProtocolError::MissingPayload)
        ));
    }

    #[test]
    fn command_response_echoes_request_and_payload() {
        let message = Message::command_response("CID", "7");
        assert_eq!(message.response(), Response::Ok);
        let command = message.command_map().expect("command map");
        assert_eq!(command.get("REQ").map(String::as_str), Some("CID"));
        assert_eq!(command.get("PAYLOAD").map(String::as_str), Some("7"));
    }
}
