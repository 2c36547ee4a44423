/*!
Value sources a location chain is resolved against.

Two surfaces take part in every cycle: the shared [`MessageContext`] and the
per-cycle [`MessageDocument`]. Location tokens select between them:

- `PROCESSOR_INPUT` / `INPUT_MESSAGE` - the whole document
- `@context.<key>` - context only
- `@message.<path>` - document only
- anything else - context first, then document
*/

use crate::value::ColumnValue;
use indexmap::IndexMap;
use serde_json::Value as JsonValue;

/// Token meaning "the entire current document"
pub const PROCESSOR_INPUT: &str = "PROCESSOR_INPUT";
/// Older spelling of [`PROCESSOR_INPUT`]
pub const INPUT_MESSAGE: &str = "INPUT_MESSAGE";

pub const CONTEXT_PREFIX: &str = "@context.";
pub const MESSAGE_PREFIX: &str = "@message.";

/// A lookup surface exposing `exists` / `get`
pub trait ValueSource {
    fn get(&self, key: &str) -> Option<ColumnValue>;

    fn exists(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

/// Shared key-value store carried across processors of one pipeline run
#[derive(Debug, Clone, Default)]
pub struct MessageContext {
    entries: IndexMap<String, ColumnValue>,
}

impl MessageContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ColumnValue>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<ColumnValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<ColumnValue> {
        self.entries.shift_remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build a context from a flat JSON object; nested nodes are kept as documents
    pub fn from_json(value: &JsonValue) -> Self {
        let mut ctx = Self::new();
        if let JsonValue::Object(map) = value {
            for (key, node) in map {
                if let Some(v) = ColumnValue::from_json(node) {
                    ctx.set(key.clone(), v);
                }
            }
        }
        ctx
    }
}

impl ValueSource for MessageContext {
    fn get(&self, key: &str) -> Option<ColumnValue> {
        self.entries.get(key).cloned()
    }
}

/// The per-cycle input object
#[derive(Debug, Clone, PartialEq, Default)]
pub enum MessageDocument {
    Json(JsonValue),
    Text(String),
    Bytes(Vec<u8>),
    #[default]
    Empty,
}

impl MessageDocument {
    pub fn json(value: JsonValue) -> Self {
        MessageDocument::Json(value)
    }

    /// Parse text as JSON when it looks like JSON, otherwise keep it as text
    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            if let Ok(value) = serde_json::from_str(text) {
                return MessageDocument::Json(value);
            }
        }
        MessageDocument::Text(text.to_string())
    }

    /// The entire document as a single value
    pub fn payload(&self) -> Option<ColumnValue> {
        match self {
            MessageDocument::Json(JsonValue::Null) | MessageDocument::Empty => None,
            MessageDocument::Json(value) => Some(ColumnValue::Document(value.clone())),
            MessageDocument::Text(text) => Some(ColumnValue::Text(text.clone())),
            MessageDocument::Bytes(bytes) => Some(ColumnValue::Bytes(bytes.clone())),
        }
    }

    /// Walk a dotted path (`a.b.0.c`); numeric segments index arrays
    fn lookup(&self, path: &str) -> Option<&JsonValue> {
        let MessageDocument::Json(root) = self else {
            return None;
        };
        let mut node = root;
        for segment in path.split('.').filter(|s| !s.is_empty()) {
            node = match node {
                JsonValue::Object(map) => map.get(segment)?,
                JsonValue::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(node)
    }
}

impl ValueSource for MessageDocument {
    fn get(&self, key: &str) -> Option<ColumnValue> {
        self.lookup(key).and_then(ColumnValue::from_json)
    }
}

/// Parsed form of one location token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location<'a> {
    Payload,
    Context(&'a str),
    Document(&'a str),
    Either(&'a str),
}

impl<'a> Location<'a> {
    pub fn parse(token: &'a str) -> Self {
        let token = token.trim();
        if token.eq_ignore_ascii_case(PROCESSOR_INPUT) || token.eq_ignore_ascii_case(INPUT_MESSAGE) {
            Location::Payload
        } else if let Some(key) = token.strip_prefix(CONTEXT_PREFIX) {
            Location::Context(key)
        } else if let Some(path) = token.strip_prefix(MESSAGE_PREFIX) {
            Location::Document(path)
        } else {
            Location::Either(token)
        }
    }

    /// Look the token up against both sources
    pub fn fetch(&self, context: &dyn ValueSource, document: &MessageDocument) -> Option<ColumnValue> {
        match *self {
            Location::Payload => document.payload(),
            Location::Context(key) => context.get(key),
            Location::Document(path) => document.get(path),
            Location::Either(key) => context
                .get(key)
                .filter(|v| !v.is_sql_null())
                .or_else(|| document.get(key)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn order() -> MessageDocument {
        MessageDocument::json(json!({
            "order": {
                "tn": "2135551212",
                "lines": [{"lrn": "9725550000"}, {"lrn": null}],
                "priority": 3
            }
        }))
    }

    #[test]
    fn test_document_dotted_paths() {
        let doc = order();
        assert_eq!(doc.get("order.tn"), Some(ColumnValue::from("2135551212")));
        assert_eq!(doc.get("order.lines.0.lrn"), Some(ColumnValue::from("9725550000")));
        assert_eq!(doc.get("order.lines.1.lrn"), None);
        assert_eq!(doc.get("order.priority"), Some(ColumnValue::Integer(3)));
        assert!(!doc.exists("order.missing"));
        assert!(!doc.exists("order.tn.deeper"));
    }

    #[test]
    fn test_location_parsing() {
        assert_eq!(Location::parse("processor_input"), Location::Payload);
        assert_eq!(Location::parse("INPUT_MESSAGE"), Location::Payload);
        assert_eq!(Location::parse("@context.lrn"), Location::Context("lrn"));
        assert_eq!(Location::parse("@message.order.tn"), Location::Document("order.tn"));
        assert_eq!(Location::parse(" lrn "), Location::Either("lrn"));
    }

    #[test]
    fn test_context_shadows_document() {
        let ctx = MessageContext::new().with("order.tn", "from-context");
        let doc = order();

        let either = Location::parse("order.tn").fetch(&ctx, &doc);
        assert_eq!(either, Some(ColumnValue::from("from-context")));

        let doc_only = Location::parse("@message.order.tn").fetch(&ctx, &doc);
        assert_eq!(doc_only, Some(ColumnValue::from("2135551212")));

        let ctx_only = Location::parse("@context.order.priority").fetch(&ctx, &doc);
        assert_eq!(ctx_only, None);
    }

    #[test]
    fn test_payload_variants() {
        assert_eq!(MessageDocument::Empty.payload(), None);
        assert_eq!(
            MessageDocument::parse("<xml/>").payload(),
            Some(ColumnValue::from("<xml/>"))
        );
        assert!(matches!(
            MessageDocument::parse(r#"{"a":1}"#).payload(),
            Some(ColumnValue::Document(_))
        ));
    }
}
