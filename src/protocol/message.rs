//! Request and response message shapes carried by the wire format.
//!
//! Requests are CBOR maps `{id, method, params?}`; everything the device
//! sends back is decoded into [`Message`], whose fields are all optional
//! at the wire level. A message is matched to its request purely by `id`.

use ciborium::Value;
use serde::{Deserialize, Serialize};

use crate::error::{KeywireError, Result};

/// Maximum length of a correlation id, in characters.
pub const MAX_ID_LEN: usize = 16;

/// Maximum length of a method name, in characters.
pub const MAX_METHOD_LEN: usize = 32;

/// Method name used to fetch follow-up chunks of an extended response.
pub const GET_EXTENDED_DATA: &str = "get_extended_data";

/// Key wrapping a redirection instruction inside a `result` payload.
pub const HTTP_REQUEST_KEY: &str = "http_request";

/// An outgoing RPC request.
///
/// Immutable after construction; one is built per logical call and per
/// follow-up chunk fetch.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    /// Correlation id tying this request to its response(s).
    pub id: String,
    /// Method name understood by the device.
    pub method: String,
    /// Optional structured parameters; omitted from the wire when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    /// Create a new request.
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    /// Validate id and method limits.
    ///
    /// Called before anything is sent; a violation means no bytes reach
    /// the wire.
    ///
    /// # Errors
    ///
    /// Returns [`KeywireError::Validation`] when the id is empty or longer
    /// than [`MAX_ID_LEN`], or the method is empty or longer than
    /// [`MAX_METHOD_LEN`].
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() || self.id.chars().count() > MAX_ID_LEN {
            return Err(KeywireError::Validation(format!(
                "request id must be 1..={} characters, got {:?}",
                MAX_ID_LEN, self.id
            )));
        }
        if self.method.is_empty() || self.method.chars().count() > MAX_METHOD_LEN {
            return Err(KeywireError::Validation(format!(
                "request method must be 1..={} characters, got {:?}",
                MAX_METHOD_LEN, self.method
            )));
        }
        Ok(())
    }
}

/// Device-reported error payload, passed through verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
}

/// A decoded top-level message from the device.
///
/// Every field is optional on the wire; the frame detector only accepts
/// maps carrying at least one of `error`, `result`, `log`, or `method`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    /// Correlation id; empty when the device sent none.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Successful result payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Terminal error payload; never merged further.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    /// Chunk index of an extended response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seqnum: Option<u64>,
    /// Total chunk count of an extended response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seqlen: Option<u64>,
    /// Free-form log line from the device firmware.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
    /// Method name, present on request-shaped frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Parameters, present on request-shaped frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Message {
    /// Whether this message is one chunk of a multi-chunk response with
    /// more chunks to follow.
    ///
    /// `seqnum == seqlen` is tolerated as "not extended".
    pub fn is_extended(&self) -> bool {
        matches!((self.seqnum, self.seqlen), (Some(n), Some(len)) if n < len)
    }

    /// Extract a redirection instruction from the `result` payload, if any.
    ///
    /// # Errors
    ///
    /// Returns [`KeywireError::Protocol`] when an `http_request` wrapper is
    /// present but lacks a textual `on-reply` method name.
    pub fn http_request(&self) -> Result<Option<HttpRequest>> {
        let entries = match &self.result {
            Some(Value::Map(entries)) => entries,
            _ => return Ok(None),
        };
        let instruction = match map_get(entries, HTTP_REQUEST_KEY) {
            Some(Value::Map(inner)) => inner,
            Some(_) => {
                return Err(KeywireError::Protocol(
                    "http_request instruction is not a map".to_string(),
                ))
            }
            None => return Ok(None),
        };

        let on_reply = match map_get(instruction, "on-reply") {
            Some(Value::Text(method)) => method.clone(),
            _ => {
                return Err(KeywireError::Protocol(
                    "http_request instruction missing on-reply method".to_string(),
                ))
            }
        };
        let params = map_get(instruction, "params")
            .cloned()
            .unwrap_or(Value::Null);

        Ok(Some(HttpRequest { params, on_reply }))
    }
}

/// A redirection instruction: perform an external HTTP action and feed
/// its body back to the device as a new call.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Opaque parameters for the external action runner.
    pub params: Value,
    /// Method name for the follow-up call carrying the action's result.
    pub on_reply: String,
}

/// Look up a text key in a CBOR map's entry list.
pub(crate) fn map_get<'a>(entries: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
    entries.iter().find_map(|(k, v)| match k {
        Value::Text(t) if t == key => Some(v),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CborCodec;

    #[test]
    fn test_request_validation_limits() {
        assert!(Request::new("r1", "ping", None).validate().is_ok());
        assert!(Request::new("a".repeat(16), "ping", None).validate().is_ok());
        assert!(Request::new("", "ping", None).validate().is_err());
        assert!(Request::new("a".repeat(17), "ping", None)
            .validate()
            .is_err());
        assert!(Request::new("r1", "", None).validate().is_err());
        assert!(Request::new("r1", "m".repeat(33), None).validate().is_err());
    }

    #[test]
    fn test_request_omits_absent_params() {
        let bytes = CborCodec::encode(&Request::new("r1", "ping", None)).unwrap();
        let value: Value = CborCodec::decode(&bytes).unwrap();
        let entries = value.into_map().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(map_get(&entries, "params").is_none());
    }

    #[test]
    fn test_message_extended_detection() {
        let mut msg = Message {
            id: "r1".to_string(),
            seqnum: Some(0),
            seqlen: Some(3),
            ..Message::default()
        };
        assert!(msg.is_extended());

        // Last chunk: seqnum == seqlen - 1 still means more processing,
        // but seqnum == seqlen is tolerated as "not extended".
        msg.seqnum = Some(3);
        assert!(!msg.is_extended());

        msg.seqnum = None;
        msg.seqlen = None;
        assert!(!msg.is_extended());
    }

    #[test]
    fn test_message_decodes_with_missing_fields() {
        let encoded = CborCodec::encode(&Value::Map(vec![(
            Value::Text("result".to_string()),
            Value::Integer(1.into()),
        )]))
        .unwrap();

        let msg: Message = CborCodec::decode(&encoded).unwrap();
        assert!(msg.id.is_empty());
        assert_eq!(msg.result, Some(Value::Integer(1.into())));
        assert!(msg.error.is_none());
        assert!(!msg.is_extended());
    }

    #[test]
    fn test_http_request_extraction() {
        let msg = Message {
            id: "r1".to_string(),
            result: Some(Value::Map(vec![(
                Value::Text(HTTP_REQUEST_KEY.to_string()),
                Value::Map(vec![
                    (
                        Value::Text("params".to_string()),
                        Value::Text("payload".to_string()),
                    ),
                    (
                        Value::Text("on-reply".to_string()),
                        Value::Text("pin".to_string()),
                    ),
                ]),
            )])),
            ..Message::default()
        };

        let req = msg.http_request().unwrap().expect("instruction");
        assert_eq!(req.on_reply, "pin");
        assert_eq!(req.params, Value::Text("payload".to_string()));
    }

    #[test]
    fn test_http_request_absent_for_plain_results() {
        let msg = Message {
            id: "r1".to_string(),
            result: Some(Value::Text("ok".to_string())),
            ..Message::default()
        };
        assert!(msg.http_request().unwrap().is_none());
    }

    #[test]
    fn test_http_request_missing_on_reply_is_protocol_error() {
        let msg = Message {
            id: "r1".to_string(),
            result: Some(Value::Map(vec![(
                Value::Text(HTTP_REQUEST_KEY.to_string()),
                Value::Map(vec![(
                    Value::Text("params".to_string()),
                    Value::Null,
                )]),
            )])),
            ..Message::default()
        };
        assert!(matches!(
            msg.http_request(),
            Err(KeywireError::Protocol(_))
        ));
    }
}
