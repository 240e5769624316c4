use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::ids::PluginUserId;

/// An inbound wire message: a JSON object discriminated by a string
/// `type` field. Anything else — bad UTF-8, bad JSON, a top-level
/// array/null/primitive, a missing or non-string `type` — parses to
/// `None` rather than an error; the caller drops it and moves on.
#[derive(Clone, Debug)]
pub struct Envelope {
    kind: String,
    body: Value,
}

impl Envelope {
    /// Decode a raw frame. The transport has already reassembled any
    /// fragmented message into one buffer.
    pub fn parse(data: &[u8]) -> Option<Envelope> {
        let text = std::str::from_utf8(data).ok()?;
        let value: Value = serde_json::from_str(text).ok()?;

        if !value.is_object() {
            return None;
        }

        let kind = value.get("type")?.as_str()?.to_owned();

        Some(Envelope { kind, body: value })
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Deserialize the full envelope object into a typed payload.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.body.clone())
    }
}

/// Payload of a `register` envelope.
#[derive(Clone, Debug, Deserialize)]
pub struct RegisterPayload {
    #[serde(rename = "userId")]
    pub user_id: PluginUserId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_register_envelope() {
        let env = Envelope::parse(br#"{"type":"register","userId":"u1"}"#).unwrap();
        assert_eq!(env.kind(), "register");

        let payload: RegisterPayload = env.payload().unwrap();
        assert_eq!(payload.user_id.as_str(), "u1");
    }

    #[test]
    fn keeps_unknown_fields() {
        let env = Envelope::parse(br#"{"type":"register","userId":"u1","extra":42}"#).unwrap();
        let payload: RegisterPayload = env.payload().unwrap();
        assert_eq!(payload.user_id.as_str(), "u1");
    }

    #[test]
    fn rejects_invalid_utf8() {
        assert!(Envelope::parse(&[0xff, 0xfe, 0xfd]).is_none());
    }

    #[test]
    fn rejects_invalid_json() {
        assert!(Envelope::parse(b"{not json").is_none());
    }

    #[test]
    fn rejects_non_object_top_level() {
        assert!(Envelope::parse(b"[1,2,3]").is_none());
        assert!(Envelope::parse(b"null").is_none());
        assert!(Envelope::parse(b"\"register\"").is_none());
        assert!(Envelope::parse(b"42").is_none());
    }

    #[test]
    fn rejects_missing_type() {
        assert!(Envelope::parse(br#"{"userId":"u1"}"#).is_none());
    }

    #[test]
    fn rejects_non_string_type() {
        assert!(Envelope::parse(br#"{"type":7,"userId":"u1"}"#).is_none());
        assert!(Envelope::parse(br#"{"type":null}"#).is_none());
    }

    #[test]
    fn unknown_kind_still_parses() {
        let env = Envelope::parse(br#"{"type":"subscribe"}"#).unwrap();
        assert_eq!(env.kind(), "subscribe");
    }

    #[test]
    fn register_payload_rejects_missing_user_id() {
        let env = Envelope::parse(br#"{"type":"register"}"#).unwrap();
        assert!(env.payload::<RegisterPayload>().is_err());
    }

    #[test]
    fn register_payload_rejects_empty_user_id() {
        let env = Envelope::parse(br#"{"type":"register","userId":""}"#).unwrap();
        assert!(env.payload::<RegisterPayload>().is_err());
    }
}
