//! Wire envelope for hub/client communication.
//!
//! Every frame in either direction is a JSON text frame of the form
//! `{"protocol_id": <int>, "data": <string | object>}`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{INSPECTION_READY, REVIEW_RESULT};
use crate::error::{Result, ReviewError};

/// Suffix the hub appends when echoing a plain protocol-1 message.
pub const ECHO_SUFFIX: &str = " # Review Finished";

/// Protocol message envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Numeric protocol identifier
    pub protocol_id: i64,
    /// Payload, either a plain string or a structured object
    pub data: Value,
}

/// Payload of an inspection-ready notification and of a review result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectionReport {
    /// Inspector host that serves the report
    pub host: String,
    /// Report path on the inspector host
    pub target: String,
    /// Inspection model name
    pub model: String,
    /// Inspection model version
    pub version: String,
}

impl Envelope {
    /// Create an envelope from any payload value
    pub fn new(protocol_id: i64, data: impl Into<Value>) -> Self {
        Self {
            protocol_id,
            data: data.into(),
        }
    }

    /// Create an inspection-ready notification (protocol 1)
    pub fn inspection_ready(report: &InspectionReport) -> Self {
        Self::new(INSPECTION_READY, json!(report))
    }

    /// Create a review result (protocol 2)
    pub fn review_result(report: &InspectionReport) -> Self {
        Self::new(REVIEW_RESULT, json!(report))
    }

    /// Create the hub's echo reply to a plain protocol-1 message
    pub fn echo_reply(original: &str) -> Self {
        Self::new(
            REVIEW_RESULT,
            json!({ "msg": format!("{original}{ECHO_SUFFIX}") }),
        )
    }

    /// Decode a text frame.
    ///
    /// Only the presence of an integer `protocol_id` and of `data` is
    /// checked; the payload shape is left to the handler.
    pub fn decode(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ReviewError::Protocol(format!("malformed JSON: {e}")))?;

        let Value::Object(mut obj) = value else {
            return Err(ReviewError::Protocol("envelope is not an object".into()));
        };

        let protocol_id = match obj.get("protocol_id") {
            Some(id) => id
                .as_i64()
                .ok_or_else(|| ReviewError::Protocol(format!("invalid protocol_id: {id}")))?,
            None => return Err(ReviewError::Protocol("missing protocol_id".into())),
        };

        let data = obj
            .remove("data")
            .ok_or_else(|| ReviewError::Protocol("missing data".into()))?;

        Ok(Self { protocol_id, data })
    }

    /// Serialize to a text frame
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_structured() {
        let env = Envelope::decode(
            r#"{"protocol_id":1,"data":{"host":"10.1.1.2","target":"/r/report.xml","model":"m","version":"v2"}}"#,
        )
        .unwrap();
        assert_eq!(env.protocol_id, 1);
        let report: InspectionReport = serde_json::from_value(env.data).unwrap();
        assert_eq!(report.host, "10.1.1.2");
        assert_eq!(report.target, "/r/report.xml");
        assert_eq!(report.version, "v2");
    }

    #[test]
    fn test_decode_plain_string() {
        let env = Envelope::decode(r#"{"protocol_id":1,"data":"hello"}"#).unwrap();
        assert_eq!(env.data.as_str(), Some("hello"));
    }

    #[test]
    fn test_decode_rejects_missing_fields() {
        assert!(matches!(
            Envelope::decode(r#"{"data":"x"}"#),
            Err(ReviewError::Protocol(_))
        ));
        assert!(matches!(
            Envelope::decode(r#"{"protocol_id":2}"#),
            Err(ReviewError::Protocol(_))
        ));
        assert!(matches!(
            Envelope::decode(r#"{"protocol_id":"two","data":{}}"#),
            Err(ReviewError::Protocol(_))
        ));
        assert!(matches!(
            Envelope::decode("not json"),
            Err(ReviewError::Protocol(_))
        ));
        assert!(matches!(
            Envelope::decode("[1,2]"),
            Err(ReviewError::Protocol(_))
        ));
    }

    #[test]
    fn test_echo_reply() {
        let env = Envelope::echo_reply("Hello");
        assert_eq!(env.protocol_id, REVIEW_RESULT);
        assert_eq!(env.data["msg"], "Hello # Review Finished");
    }

    #[test]
    fn test_wire_shape() {
        let env = Envelope::new(7, "ping");
        assert_eq!(env.to_text().unwrap(), r#"{"protocol_id":7,"data":"ping"}"#);
    }
}
