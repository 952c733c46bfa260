//! Envelope wire format.
//!
//! Every frame exchanged over a connection is a flat JSON object:
//!
//! ```text
//! { "type": <string>, "source": <string>, ...payload fields }
//! ```
//!
//! `type` selects the dispatch target and `source` names the sender. Both
//! keys are reserved; every other top-level field belongs to the payload.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Flat payload fields carried next to the reserved keys.
pub type Payload = Map<String, Value>;

/// Keys owned by the envelope itself. Payloads may not use them.
pub const RESERVED_KEYS: [&str; 2] = ["type", "source"];

/// Errors produced while encoding or decoding an envelope.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The frame was not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// The frame parsed, but the top level was not an object.
    #[error("envelope must be a JSON object")]
    NotAnObject,
    /// A reserved key was absent, empty, or not a string.
    #[error("envelope field `{0}` is missing, empty, or not a string")]
    MissingField(&'static str),
    /// A payload field would overwrite a reserved key.
    #[error("payload field `{0}` collides with a reserved envelope key")]
    ReservedField(String),
    /// Payloads must serialize to an object (or null for "no fields").
    #[error("payload must serialize to a JSON object")]
    PayloadNotAnObject,
}

/// A decoded envelope.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    /// Dispatch discriminator (`type` on the wire).
    pub kind: String,
    /// Sender identity.
    pub source: String,
    /// Remaining top-level fields.
    pub payload: Payload,
}

impl Envelope {
    /// Build an envelope from its parts.
    pub fn new(kind: impl Into<String>, source: impl Into<String>, payload: Payload) -> Self {
        Self {
            kind: kind.into(),
            source: source.into(),
            payload,
        }
    }

    /// Serialize to the flat wire representation.
    ///
    /// Fails if a payload field uses a reserved key.
    pub fn encode(&self) -> Result<String, EnvelopeError> {
        check_reserved(&self.payload)?;
        let mut map = Map::with_capacity(self.payload.len() + RESERVED_KEYS.len());
        let _ = map.insert("type".into(), Value::String(self.kind.clone()));
        let _ = map.insert("source".into(), Value::String(self.source.clone()));
        map.extend(self.payload.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(serde_json::to_string(&Value::Object(map))?)
    }

    /// Parse a text frame.
    pub fn decode(text: &str) -> Result<Self, EnvelopeError> {
        let Value::Object(mut map) = serde_json::from_str::<Value>(text)? else {
            return Err(EnvelopeError::NotAnObject);
        };
        let kind = take_string(&mut map, "type")?;
        let source = take_string(&mut map, "source")?;
        Ok(Self {
            kind,
            source,
            payload: map,
        })
    }
}

/// Convert any serializable value into payload fields.
///
/// `null` (e.g. `()` or `None`) becomes an empty payload. Anything that is
/// not an object, or that uses a reserved key, is rejected.
pub fn to_payload<T: Serialize + ?Sized>(value: &T) -> Result<Payload, EnvelopeError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => {
            check_reserved(&map)?;
            Ok(map)
        }
        Value::Null => Ok(Payload::new()),
        _ => Err(EnvelopeError::PayloadNotAnObject),
    }
}

fn check_reserved(payload: &Payload) -> Result<(), EnvelopeError> {
    match RESERVED_KEYS.iter().find(|key| payload.contains_key(**key)) {
        Some(key) => Err(EnvelopeError::ReservedField((*key).to_string())),
        None => Ok(()),
    }
}

fn take_string(map: &mut Payload, key: &'static str) -> Result<String, EnvelopeError> {
    match map.remove(key) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s),
        _ => Err(EnvelopeError::MissingField(key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use serde_json::json;

    fn payload(value: Value) -> Payload {
        to_payload(&value).unwrap()
    }

    #[test]
    fn encode_flattens_payload() {
        let env = Envelope::new("chat", "alice", payload(json!({"text": "hi", "n": 2})));
        let wire: Value = serde_json::from_str(&env.encode().unwrap()).unwrap();
        assert_eq!(wire, json!({"type": "chat", "source": "alice", "text": "hi", "n": 2}));
    }

    #[test]
    fn decode_splits_reserved_keys() {
        let env = Envelope::decode(r#"{"type":"register","source":"bob","room":"a"}"#).unwrap();
        assert_eq!(env.kind, "register");
        assert_eq!(env.source, "bob");
        assert_eq!(env.payload.len(), 1);
        assert_eq!(env.payload["room"], "a");
    }

    #[test]
    fn decode_without_payload_fields() {
        let env = Envelope::decode(r#"{"type":"ping","source":"bob"}"#).unwrap();
        assert!(env.payload.is_empty());
    }

    #[test]
    fn decode_rejects_invalid_json() {
        assert_matches!(Envelope::decode("not json"), Err(EnvelopeError::Json(_)));
        assert_matches!(Envelope::decode(""), Err(EnvelopeError::Json(_)));
    }

    #[test]
    fn decode_rejects_non_object() {
        assert_matches!(Envelope::decode("[1,2]"), Err(EnvelopeError::NotAnObject));
        assert_matches!(Envelope::decode("\"x\""), Err(EnvelopeError::NotAnObject));
    }

    #[test]
    fn decode_rejects_missing_or_mistyped_keys() {
        assert_matches!(
            Envelope::decode(r#"{"source":"a"}"#),
            Err(EnvelopeError::MissingField("type"))
        );
        assert_matches!(
            Envelope::decode(r#"{"type":"x"}"#),
            Err(EnvelopeError::MissingField("source"))
        );
        assert_matches!(
            Envelope::decode(r#"{"type":"x","source":7}"#),
            Err(EnvelopeError::MissingField("source"))
        );
        assert_matches!(
            Envelope::decode(r#"{"type":"","source":"a"}"#),
            Err(EnvelopeError::MissingField("type"))
        );
    }

    #[test]
    fn encode_rejects_reserved_payload_key() {
        let mut fields = Payload::new();
        let _ = fields.insert("source".into(), json!("mallory"));
        let env = Envelope::new("chat", "alice", fields);
        assert_matches!(env.encode(), Err(EnvelopeError::ReservedField(k)) if k == "source");
    }

    #[test]
    fn to_payload_accepts_null_as_empty() {
        assert!(to_payload(&()).unwrap().is_empty());
        assert!(to_payload(&Option::<u8>::None).unwrap().is_empty());
    }

    #[test]
    fn to_payload_rejects_scalars_and_arrays() {
        assert_matches!(to_payload(&42), Err(EnvelopeError::PayloadNotAnObject));
        assert_matches!(to_payload(&[1, 2]), Err(EnvelopeError::PayloadNotAnObject));
    }

    #[test]
    fn to_payload_from_struct() {
        #[derive(Serialize)]
        struct Hello {
            room: &'static str,
        }
        let p = to_payload(&Hello { room: "lobby" }).unwrap();
        assert_eq!(p["room"], "lobby");
    }

    proptest! {
        #[test]
        fn reserved_keys_never_survive_encoding(key in prop::sample::select(RESERVED_KEYS.to_vec()), val in ".*") {
            let mut fields = Payload::new();
            let _ = fields.insert(key.to_string(), Value::String(val));
            let env = Envelope::new("t", "s", fields);
            prop_assert!(matches!(env.encode(), Err(EnvelopeError::ReservedField(_))));
        }

        #[test]
        fn decoded_payload_never_contains_reserved_keys(extra in "[a-z]{1,8}", val in any::<i64>()) {
            prop_assume!(!RESERVED_KEYS.contains(&extra.as_str()));
            let mut map = Payload::new();
            let _ = map.insert("type".into(), json!("t"));
            let _ = map.insert("source".into(), json!("s"));
            let _ = map.insert(extra, json!(val));
            let env = Envelope::decode(&Value::Object(map).to_string()).unwrap();
            for key in RESERVED_KEYS {
                prop_assert!(!env.payload.contains_key(key));
            }
        }
    }
}
