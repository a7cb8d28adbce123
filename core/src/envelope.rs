use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One content item of a tool result. Only text content is produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text { text: String },
}

/// The shape every successful capability invocation returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub content: Vec<ContentBlock>,
}

impl ResultEnvelope {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    /// Pretty-printed (two-space indent) JSON of `value`.
    pub fn json(value: &Value) -> Self {
        let text = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
        Self::text(text)
    }

    pub fn first_text(&self) -> Option<&str> {
        self.content.first().map(|block| match block {
            ContentBlock::Text { text } => text.as_str(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_envelope_uses_two_space_indentation() {
        let envelope = ResultEnvelope::json(&json!({ "ok": true }));
        assert_eq!(envelope.first_text(), Some("{\n  \"ok\": true\n}"));
        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({ "content": [{ "type": "text", "text": "{\n  \"ok\": true\n}" }] })
        );
    }
}
