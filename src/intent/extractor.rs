//! Structured intent: the shape an extractor returns and how it becomes a signal

use crate::error::RouterResult;
use crate::routing::signal::{clamp_unit, Extracted, SignalResult};
use crate::routing::AgentKind;
use crate::session::SessionContext;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Intent and entities pulled out of one query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExtractedIntent {
    /// One of: general, specific_item, item_feature, seller_info, exploration, comparison, other
    pub intent: String,
    /// Base product identifiers mentioned in the query
    #[serde(default)]
    pub base_ids: Vec<String>,
    /// Product codes, SKUs or model numbers
    #[serde(default)]
    pub product_codes: Vec<String>,
    /// Requested attributes such as colour, size or storage
    #[serde(default)]
    pub attributes: Vec<String>,
    /// Whether the user asks about price
    #[serde(default)]
    pub price_inquiry: bool,
    pub brand: Option<String>,
    pub category: Option<String>,
    /// Confidence in the intent label, between 0.0 and 1.0
    #[serde(default)]
    pub confidence: f64,
}

impl ExtractedIntent {
    /// Intent carrying no information
    pub fn none() -> Self {
        Self::default()
    }

    /// Build from loosely-typed model output.
    ///
    /// Language models do not always honour the schema: lists arrive as
    /// comma-separated strings or `null`, single strings arrive as lists,
    /// booleans arrive as words. All of those are accepted here.
    pub fn from_json(value: &Value) -> Self {
        Self {
            intent: optional_string(value.get("intent")).unwrap_or_default(),
            base_ids: string_list(value.get("base_ids")),
            product_codes: string_list(value.get("product_codes")),
            attributes: string_list(value.get("attributes")),
            price_inquiry: flag(value.get("price_inquiry")),
            brand: optional_string(value.get("brand")),
            category: optional_string(value.get("category")),
            confidence: number(value.get("confidence")),
        }
    }

    /// JSON schema handed to providers that support structured output
    pub fn json_schema() -> Value {
        let schema = schemars::schema_for!(ExtractedIntent);
        serde_json::to_value(schema).unwrap_or_else(|_| json!({"type": "object"}))
    }

    /// Agent the label names. Unknown labels map to exploration.
    pub fn agent(&self) -> AgentKind {
        AgentKind::from_label(&self.intent).unwrap_or(AgentKind::Exploration)
    }

    pub fn to_signal(&self) -> SignalResult {
        let confidence = clamp_unit(self.confidence);
        if confidence == 0.0 {
            return SignalResult::none("intent extractor returned no confident label");
        }

        let agent = self.agent();
        let reasoning = format!("intent '{}' mapped to {agent}", self.intent);
        SignalResult::new(agent, confidence, reasoning).with_extracted(self.entities())
    }

    /// Non-empty entities, keyed the way downstream handlers expect
    pub fn entities(&self) -> Extracted {
        let mut extracted = Extracted::new();
        if !self.intent.is_empty() {
            extracted.insert("intent".to_string(), json!(self.intent));
        }
        for (key, values) in [
            ("base_ids", &self.base_ids),
            ("product_codes", &self.product_codes),
            ("attributes", &self.attributes),
        ] {
            if !values.is_empty() {
                extracted.insert(key.to_string(), json!(values));
            }
        }
        if self.price_inquiry {
            extracted.insert("price_inquiry".to_string(), json!(true));
        }
        if let Some(brand) = &self.brand {
            extracted.insert("brand".to_string(), json!(brand));
        }
        if let Some(category) = &self.category {
            extracted.insert("category".to_string(), json!(category));
        }
        extracted
    }
}

fn is_null_word(s: &str) -> bool {
    matches!(s.trim().to_lowercase().as_str(), "" | "none" | "null")
}

fn optional_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !is_null_word(s) => Some(s.trim().to_string()),
        Value::Array(items) => items.iter().find_map(|item| optional_string(Some(item))),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| optional_string(Some(item)))
            .collect(),
        Some(Value::String(s)) if !is_null_word(s) => s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(String::from)
            .collect(),
        _ => Vec::new(),
    }
}

fn flag(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(
            s.trim().to_lowercase().as_str(),
            "true" | "1" | "yes" | "بله" | "آری"
        ),
        Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        _ => false,
    }
}

fn number(value: Option<&Value>) -> f64 {
    let raw = match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    };
    clamp_unit(raw)
}

/// Text plus session context in, structured intent out
#[async_trait]
pub trait IntentExtractor: Send + Sync {
    fn name(&self) -> &str;

    /// False for extractors that never produce a signal, so callers can skip them
    fn enabled(&self) -> bool {
        true
    }

    async fn extract(&self, query: &str, context: &SessionContext) -> RouterResult<ExtractedIntent>;
}

/// Extractor used when no intent provider is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledIntentExtractor;

#[async_trait]
impl IntentExtractor for DisabledIntentExtractor {
    fn name(&self) -> &str {
        "none"
    }

    fn enabled(&self) -> bool {
        false
    }

    async fn extract(&self, _query: &str, _context: &SessionContext) -> RouterResult<ExtractedIntent> {
        Ok(ExtractedIntent::none())
    }
}
