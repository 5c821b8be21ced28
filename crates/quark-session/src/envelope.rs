//! JSON message envelopes exchanged with the server.
//!
//! Outbound calls travel as `{"cmd":"data","type":"ws"|"http","data":[request]}`.
//! Inbound messages carry `cmd` (or `command`) set to `data`, `err` or `api`.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::request::{CallRequest, TransactionId};

/// Command carrying call requests and responses.
pub const CMD_DATA: &str = "data";
/// Command carrying a server-side failure.
pub const CMD_ERR: &str = "err";
/// Command carrying the API document.
pub const CMD_API: &str = "api";

/// Channel tag written into the outbound `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Ws,
    Http,
}

#[derive(Serialize)]
struct OutboundEnvelope<'a> {
    cmd: &'static str,
    #[serde(rename = "type")]
    channel: ChannelType,
    data: [&'a CallRequest; 1],
}

/// Serialize one request into a `data` envelope.
pub fn data_envelope(request: &CallRequest, channel: ChannelType) -> serde_json::Result<String> {
    serde_json::to_string(&OutboundEnvelope {
        cmd: CMD_DATA,
        channel,
        data: [request],
    })
}

/// Classified inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Response records, each normally carrying a `tid`.
    Data(Vec<Value>),
    /// Server-reported failure, attributable to a call when `tid` is set.
    Err {
        tid: Option<TransactionId>,
        error: RemoteError,
    },
    /// An API document.
    Api(Value),
    /// Anything else.
    Other(Value),
}

/// Sort an inbound JSON message by its command.
///
/// A bare array is a list of records; a bare object with a `tid` or
/// `result` is a single record.
pub fn classify(value: Value) -> Inbound {
    let command = command_of(&value).map(str::to_owned);
    match (command.as_deref(), value) {
        (_, Value::Array(records)) => Inbound::Data(records),
        (Some(CMD_DATA), Value::Object(mut map)) => match map.remove("data") {
            Some(Value::Array(records)) => Inbound::Data(records),
            Some(record @ Value::Object(_)) => Inbound::Data(vec![record]),
            _ => Inbound::Data(Vec::new()),
        },
        (Some(CMD_ERR), value) => {
            let source = value
                .get("result")
                .or_else(|| value.get("data"))
                .filter(|inner| inner.is_object() || inner.is_string())
                .unwrap_or(&value);
            let tid = value
                .get("tid")
                .or_else(|| source.get("tid"))
                .and_then(TransactionId::from_value);
            Inbound::Err {
                tid,
                error: RemoteError::from_value(source),
            }
        }
        (Some(CMD_API), Value::Object(mut map)) => match map.remove("data") {
            Some(document) => Inbound::Api(document),
            None => Inbound::Api(Value::Object(map)),
        },
        (None, value) if value.get("tid").is_some() || value.get("result").is_some() => {
            Inbound::Data(vec![value])
        }
        (_, value) => Inbound::Other(value),
    }
}

fn command_of(value: &Value) -> Option<&str> {
    value
        .get("cmd")
        .or_else(|| value.get("command"))
        .and_then(Value::as_str)
}

/// Apply the response success rule to a record matched to a call.
///
/// The call succeeds only when `result.success` is true and the record's
/// `action`/`method`, when present, name the called method. On success the
/// `result` object is returned.
pub fn settle_response(action: &str, method: &str, record: Value) -> Result<Value, RemoteError> {
    let names_other = |key: &str, expected: &str| {
        record
            .get(key)
            .and_then(Value::as_str)
            .is_some_and(|found| found != expected)
    };
    let success = record
        .get("result")
        .and_then(|result| result.get("success"))
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if success && !names_other("action", action) && !names_other("method", method) {
        return Ok(record.get("result").cloned().unwrap_or(Value::Null));
    }

    match record.get("result") {
        Some(result) if !result.is_null() => Err(RemoteError::from_value(result)),
        _ => Err(RemoteError::from_value(&record)),
    }
}

/// Failure reported by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError {
    /// Normalized message, prefixed with the code when the server sent one.
    pub message: String,
    /// Server error code, if any.
    pub code: Option<String>,
    /// The raw failure object.
    pub data: Value,
}

impl RemoteError {
    /// Normalize a server failure object.
    ///
    /// The message comes from `message`, `msg` or `error`, in that order.
    /// A `code` not already part of the message is prepended as
    /// `"<code> : <message>"`.
    pub fn from_value(value: &Value) -> Self {
        if let Value::String(text) = value {
            return Self {
                message: text.clone(),
                code: None,
                data: value.clone(),
            };
        }

        let mut message = ["message", "msg", "error"]
            .iter()
            .find_map(|key| value.get(*key).and_then(Value::as_str))
            .unwrap_or_default()
            .to_string();

        let code = match value.get("code") {
            Some(Value::String(code)) if !code.is_empty() => Some(code.clone()),
            Some(Value::Number(code)) => Some(code.to_string()),
            _ => None,
        };
        if let Some(code) = &code {
            if !message.contains(code.as_str()) {
                message = format!("{code} : {message}");
            }
        }

        Self {
            message,
            code,
            data: value.clone(),
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            f.write_str("remote call failed")
        } else {
            f.write_str(&self.message)
        }
    }
}

impl std::error::Error for RemoteError {}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn outbound_envelope_shape() {
        let request = CallRequest {
            tid: TransactionId(1),
            sid: "s".into(),
            namespace: "io.greenscreens".into(),
            action: "Demo".into(),
            method: "hello".into(),
            e: true,
            data: vec![json!("John Doe")],
            ts: 5,
        };
        let text = data_envelope(&request, ChannelType::Ws).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["cmd"], "data");
        assert_eq!(value["type"], "ws");
        assert_eq!(value["data"][0]["tid"], "1");
        assert_eq!(value["data"][0]["data"], json!(["John Doe"]));

        let http = data_envelope(&request, ChannelType::Http).unwrap();
        assert!(http.contains(r#""type":"http""#));
    }

    #[test]
    fn classify_data_envelope() {
        let inbound = classify(json!({"cmd": "data", "data": [{"tid": "1"}, {"tid": "2"}]}));
        assert!(matches!(inbound, Inbound::Data(records) if records.len() == 2));

        let single = classify(json!({"command": "data", "data": {"tid": 3}}));
        assert!(matches!(single, Inbound::Data(records) if records.len() == 1));
    }

    #[test]
    fn classify_bare_records() {
        assert!(matches!(classify(json!([{"tid": "1"}])), Inbound::Data(_)));
        assert!(matches!(
            classify(json!({"tid": "1", "result": {"success": true}})),
            Inbound::Data(_)
        ));
        assert!(matches!(classify(json!({"hello": 1})), Inbound::Other(_)));
        assert!(matches!(classify(json!("text")), Inbound::Other(_)));
    }

    #[test]
    fn classify_err_with_tid() {
        let inbound = classify(json!({
            "cmd": "err",
            "tid": "4",
            "result": {"msg": "denied", "code": "E401"}
        }));
        match inbound {
            Inbound::Err { tid, error } => {
                assert_eq!(tid, Some(TransactionId(4)));
                assert_eq!(error.message, "E401 : denied");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn classify_err_without_tid() {
        let inbound = classify(json!({"cmd": "err", "result": {"msg": "boom"}}));
        assert!(matches!(inbound, Inbound::Err { tid: None, .. }));
    }

    #[test]
    fn classify_api() {
        let inbound = classify(json!({"cmd": "api", "data": {"api": []}}));
        assert_eq!(inbound, Inbound::Api(json!({"api": []})));
    }

    #[test]
    fn success_rule() {
        let record = json!({
            "tid": "1",
            "action": "Demo",
            "method": "hello",
            "result": {"success": true, "data": "Hello John Doe"}
        });
        let result = settle_response("Demo", "hello", record).unwrap();
        assert_eq!(result["data"], "Hello John Doe");
    }

    #[test]
    fn success_rule_tolerates_missing_names() {
        let record = json!({"tid": "1", "result": {"success": true}});
        assert!(settle_response("Demo", "hello", record).is_ok());
    }

    #[test]
    fn mismatched_method_rejects() {
        let record = json!({
            "action": "Demo",
            "method": "other",
            "result": {"success": true}
        });
        assert!(settle_response("Demo", "hello", record).is_err());
    }

    #[test]
    fn unsuccessful_result_rejects_with_result() {
        let record = json!({
            "action": "Demo",
            "method": "hello",
            "result": {"success": false, "msg": "invalid name", "code": 12}
        });
        let err = settle_response("Demo", "hello", record).unwrap_err();
        assert_eq!(err.message, "12 : invalid name");
        assert_eq!(err.code.as_deref(), Some("12"));
        assert_eq!(err.data["success"], false);
    }

    #[test]
    fn missing_result_rejects_with_record() {
        let err = settle_response("Demo", "hello", json!({"error": "gone"})).unwrap_err();
        assert_eq!(err.message, "gone");
    }

    #[test]
    fn remote_error_message_sources() {
        assert_eq!(RemoteError::from_value(&json!({"message": "a", "msg": "b"})).message, "a");
        assert_eq!(RemoteError::from_value(&json!({"msg": "b", "error": "c"})).message, "b");
        assert_eq!(RemoteError::from_value(&json!({"error": "c"})).message, "c");
        assert_eq!(RemoteError::from_value(&json!("plain")).message, "plain");
    }

    #[test]
    fn remote_error_code_not_duplicated() {
        let err = RemoteError::from_value(&json!({"msg": "E1 failed", "code": "E1"}));
        assert_eq!(err.message, "E1 failed");
    }

    #[test]
    fn remote_error_display_fallback() {
        let err = RemoteError::from_value(&json!({}));
        assert_eq!(err.to_string(), "remote call failed");
    }
}
