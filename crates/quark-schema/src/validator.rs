use jsonschema::Validator;
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::ParseConfig;
use crate::descriptor::ApiDocument;
use crate::error::{Result, SchemaError};

/// JSON Schema (2020-12) for the bootstrap API document.
pub const API_DOCUMENT_SCHEMA: &str = r##"{
    "$schema": "https://json-schema.org/draft/2020-12/schema",
    "type": "object",
    "properties": {
        "api": { "type": "array", "items": { "$ref": "#/$defs/action" } },
        "keyEnc": { "type": "string", "minLength": 1 },
        "keyVer": { "type": "string", "minLength": 1 },
        "signature": { "type": "string", "minLength": 1 }
    },
    "required": ["api"],
    "dependentRequired": { "signature": ["keyEnc", "keyVer"] },
    "$defs": {
        "action": {
            "type": "object",
            "properties": {
                "namespace": { "type": "string", "minLength": 1 },
                "action": { "type": "string", "minLength": 1 },
                "methods": { "type": "array", "items": { "$ref": "#/$defs/method" } }
            },
            "required": ["namespace", "action", "methods"]
        },
        "method": {
            "type": "object",
            "properties": {
                "name": { "type": "string", "minLength": 1 },
                "arity": { "$ref": "#/$defs/arity" },
                "len": { "$ref": "#/$defs/arity" },
                "async": {
                    "oneOf": [
                        { "type": "boolean" },
                        { "type": "object", "additionalProperties": { "type": "boolean" } }
                    ]
                },
                "encrypt": { "type": "boolean" }
            },
            "required": ["name"],
            "not": { "required": ["arity", "len"] }
        },
        "arity": {
            "oneOf": [
                { "type": "integer", "minimum": 0 },
                {
                    "type": "array",
                    "items": { "type": "integer", "minimum": 0 },
                    "minItems": 1
                }
            ]
        }
    }
}"##;

/// Validates and deserializes API documents.
pub struct DocumentParser {
    validator: Validator,
    config: ParseConfig,
}

impl DocumentParser {
    /// Create a parser with default config.
    pub fn new() -> Result<Self> {
        Self::with_config(ParseConfig::default())
    }

    /// Create a parser with explicit config.
    pub fn with_config(config: ParseConfig) -> Result<Self> {
        let mut schema: Value = serde_json::from_str(API_DOCUMENT_SCHEMA)?;
        if config.strict_mode {
            apply_strict_mode(&mut schema);
        }

        let validator = jsonschema::validator_for(&schema)
            .map_err(|err| SchemaError::CompileFailed(err.to_string()))?;

        Ok(Self { validator, config })
    }

    /// Parse a document from raw JSON bytes.
    pub fn parse(&self, payload: &[u8]) -> Result<ApiDocument> {
        if payload.len() > self.config.max_document_size {
            return Err(SchemaError::TooLarge {
                size: payload.len(),
                max: self.config.max_document_size,
            });
        }
        let value: Value = serde_json::from_slice(payload)?;
        self.parse_value(value)
    }

    /// Parse a document from an already-decoded JSON value.
    ///
    /// Accepts the bare document, a `{cmd|command: "api", data: {...}}`
    /// wrapper, or a bare descriptor array.
    pub fn parse_value(&self, value: Value) -> Result<ApiDocument> {
        let value = unwrap_document(value);
        self.validate(&value)?;

        let document: ApiDocument = serde_json::from_value(value)?;
        if document.api.len() > self.config.max_actions {
            return Err(SchemaError::ValidationFailed(format!(
                "document declares {} actions (max {})",
                document.api.len(),
                self.config.max_actions
            )));
        }

        debug!(
            actions = document.api.len(),
            methods = document.method_count(),
            secured = document.has_security_material(),
            "API document parsed"
        );
        Ok(document)
    }

    /// Get parser configuration.
    pub fn config(&self) -> &ParseConfig {
        &self.config
    }

    fn validate(&self, value: &Value) -> Result<()> {
        let mut errors = self.validator.iter_errors(value);
        if let Some(first) = errors.next() {
            let mut message = first.to_string();
            for err in errors.take(3) {
                message.push_str("; ");
                message.push_str(&err.to_string());
            }
            return Err(SchemaError::ValidationFailed(message));
        }
        Ok(())
    }
}

impl std::fmt::Debug for DocumentParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentParser")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn unwrap_document(value: Value) -> Value {
    match value {
        Value::Array(actions) => {
            let mut map = Map::new();
            map.insert("api".to_string(), Value::Array(actions));
            Value::Object(map)
        }
        Value::Object(mut map) => {
            let command = map
                .get("cmd")
                .or_else(|| map.get("command"))
                .and_then(Value::as_str);
            if command == Some("api") && map.get("data").is_some_and(Value::is_object) {
                map.remove("data").unwrap_or(Value::Null)
            } else {
                Value::Object(map)
            }
        }
        other => other,
    }
}

fn apply_strict_mode(value: &mut Value) {
    match value {
        Value::Object(map) => {
            if is_object_schema(map) && !map.contains_key("additionalProperties") {
                map.insert("additionalProperties".to_string(), Value::Bool(false));
            }
            for key in ["properties", "$defs"] {
                if let Some(Value::Object(children)) = map.get_mut(key) {
                    for child in children.values_mut() {
                        apply_strict_mode(child);
                    }
                }
            }
            for key in ["items", "not"] {
                if let Some(child) = map.get_mut(key) {
                    apply_strict_mode(child);
                }
            }
            if let Some(Value::Array(variants)) = map.get_mut("oneOf") {
                for variant in variants {
                    apply_strict_mode(variant);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                apply_strict_mode(item);
            }
        }
        _ => {}
    }
}

fn is_object_schema(map: &Map<String, Value>) -> bool {
    match map.get("type") {
        Some(Value::String(kind)) => kind == "object",
        _ => map.contains_key("properties"),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn hello_document() -> Value {
        json!({
            "api": [{
                "namespace": "io.greenscreens",
                "action": "Demo",
                "methods": [{"name": "hello", "len": 1}]
            }]
        })
    }

    #[test]
    fn embedded_schema_compiles_in_both_modes() {
        assert!(DocumentParser::new().is_ok());
        assert!(DocumentParser::with_config(ParseConfig::default().with_strict_mode(true)).is_ok());
    }

    #[test]
    fn parses_plain_document() {
        let parser = DocumentParser::new().unwrap();
        let doc = parser
            .parse(hello_document().to_string().as_bytes())
            .unwrap();
        assert_eq!(doc.api.len(), 1);
        assert_eq!(doc.api[0].methods[0].name, "hello");
        assert!(!doc.has_security_material());
    }

    #[test]
    fn unwraps_api_command() {
        let parser = DocumentParser::new().unwrap();
        let wrapped = json!({"cmd": "api", "data": hello_document()});
        assert_eq!(parser.parse_value(wrapped).unwrap().api.len(), 1);

        let aliased = json!({"command": "api", "data": hello_document()});
        assert_eq!(parser.parse_value(aliased).unwrap().api.len(), 1);
    }

    #[test]
    fn accepts_bare_descriptor_array() {
        let parser = DocumentParser::new().unwrap();
        let doc = parser.parse_value(hello_document()["api"].clone()).unwrap();
        assert_eq!(doc.api[0].action, "Demo");
    }

    #[test]
    fn missing_api_is_rejected() {
        let parser = DocumentParser::new().unwrap();
        let err = parser.parse(br#"{"keyEnc":"x"}"#).unwrap_err();
        assert!(matches!(err, SchemaError::ValidationFailed(_)));
    }

    #[test]
    fn signature_requires_keys() {
        let parser = DocumentParser::new().unwrap();
        let mut doc = hello_document();
        doc["signature"] = json!("c2ln");
        assert!(matches!(
            parser.parse_value(doc),
            Err(SchemaError::ValidationFailed(_))
        ));
    }

    #[test]
    fn arity_and_len_together_are_rejected() {
        let parser = DocumentParser::new().unwrap();
        let mut doc = hello_document();
        doc["api"][0]["methods"][0]["arity"] = json!(1);
        assert!(matches!(
            parser.parse_value(doc),
            Err(SchemaError::ValidationFailed(_))
        ));
    }

    #[test]
    fn negative_arity_is_rejected() {
        let parser = DocumentParser::new().unwrap();
        let mut doc = hello_document();
        doc["api"][0]["methods"][0]["len"] = json!(-1);
        assert!(parser.parse_value(doc).is_err());
    }

    #[test]
    fn strict_mode_rejects_unknown_method_fields() {
        let mut doc = hello_document();
        doc["api"][0]["methods"][0]["extra"] = json!(true);

        let lenient = DocumentParser::new().unwrap();
        assert!(lenient.parse_value(doc.clone()).is_ok());

        let strict =
            DocumentParser::with_config(ParseConfig::default().with_strict_mode(true)).unwrap();
        assert!(matches!(
            strict.parse_value(doc),
            Err(SchemaError::ValidationFailed(_))
        ));
    }

    #[test]
    fn strict_mode_keeps_async_map_open() {
        let mut doc = hello_document();
        doc["api"][0]["methods"][0]["async"] = json!({"1": true});
        let strict =
            DocumentParser::with_config(ParseConfig::default().with_strict_mode(true)).unwrap();
        assert!(strict.parse_value(doc).is_ok());
    }

    #[test]
    fn size_limit_is_enforced() {
        let parser =
            DocumentParser::with_config(ParseConfig::default().with_max_document_size(8)).unwrap();
        let err = parser
            .parse(hello_document().to_string().as_bytes())
            .unwrap_err();
        assert!(matches!(err, SchemaError::TooLarge { max: 8, .. }));
    }

    #[test]
    fn action_limit_is_enforced() {
        let parser =
            DocumentParser::with_config(ParseConfig::default().with_max_actions(0)).unwrap();
        assert!(matches!(
            parser.parse_value(hello_document()),
            Err(SchemaError::ValidationFailed(_))
        ));
    }

    #[test]
    fn invalid_json_is_reported() {
        let parser = DocumentParser::new().unwrap();
        assert!(matches!(
            parser.parse(b"{not json"),
            Err(SchemaError::InvalidJson(_))
        ));
    }
}
