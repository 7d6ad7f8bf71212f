//! Deterministic pattern rules
//!
//! The pattern detector is the router's fast path. It recognises the explicit
//! commands (`ping`, `return base random key: X`, ...) and a fixed, ordered
//! list of keyword and regex rules over English and Persian phrasing. It is a
//! pure function of the query text, so it always runs first and its strongest
//! results let the orchestrator skip the slower signals entirely.

use super::agent_kind::AgentKind;
use super::signal::{Extracted, SignalResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};

/// Confidence given to exact commands
pub const COMMAND_CONFIDENCE: f64 = 0.95;

const BASE_KEY_COMMAND: &str = "return base random key:";
const MEMBER_KEY_COMMAND: &str = "return member random key:";

/// Surface form -> canonical brand name
const BRANDS: &[(&str, &str)] = &[
    ("سامسونگ", "samsung"),
    ("samsung", "samsung"),
    ("اپل", "apple"),
    ("apple", "apple"),
    ("آیفون", "iphone"),
    ("iphone", "iphone"),
    ("شیائومی", "xiaomi"),
    ("xiaomi", "xiaomi"),
    ("هواوی", "huawei"),
    ("huawei", "huawei"),
    ("ال جی", "lg"),
    ("lg", "lg"),
    ("سونی", "sony"),
    ("sony", "sony"),
    ("ایسوس", "asus"),
    ("asus", "asus"),
    ("لنوو", "lenovo"),
    ("lenovo", "lenovo"),
    ("اچ پی", "hp"),
    ("hp", "hp"),
    ("دل", "dell"),
    ("dell", "dell"),
    ("نایک", "nike"),
    ("nike", "nike"),
    ("آدیداس", "adidas"),
    ("adidas", "adidas"),
    ("پوما", "puma"),
    ("puma", "puma"),
    ("بوش", "bosch"),
    ("bosch", "bosch"),
    ("msi", "msi"),
    ("rog", "rog"),
];

const CATEGORIES: &[&str] = &[
    "گوشی",
    "موبایل",
    "لپ تاپ",
    "لپتاپ",
    "تبلت",
    "یخچال",
    "ماشین لباسشویی",
    "تلویزیون",
    "کفش",
    "لباس",
    "کابینت",
    "کمد",
    "هدفون",
    "پارچه",
    "phone",
    "mobile",
    "laptop",
    "tablet",
    "refrigerator",
    "fridge",
    "washing machine",
    "tv",
    "television",
    "shoes",
    "clothes",
    "cabinet",
    "headphones",
    "headphone",
    "fabric",
];

fn word_alternation<'a>(words: impl Iterator<Item = &'a str>) -> String {
    let mut words: Vec<&str> = words.collect();
    // Longest first so multi-word forms win over their prefixes
    words.sort_by_key(|w| std::cmp::Reverse(w.len()));
    words
        .into_iter()
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join("|")
}

static BRAND_RE: Lazy<Regex> = Lazy::new(|| {
    let alternation = word_alternation(BRANDS.iter().map(|(surface, _)| *surface));
    Regex::new(&format!(r"(?i)\b(?:{alternation})\b")).expect("valid brand regex")
});

static CATEGORY_RE: Lazy<Regex> = Lazy::new(|| {
    let alternation = word_alternation(CATEGORIES.iter().copied());
    Regex::new(&format!(r"(?i)\b(?:{alternation})\b")).expect("valid category regex")
});

static BASE_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:\bbase\b|محصول پایه|پایه)\s*([:\-])?\s*([a-z0-9_]+(?:-[a-z0-9_]+)*)")
        .expect("valid base id regex")
});

static SHORT_BASE_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bb(\d+)\b").expect("valid short base id regex"));

static PRODUCT_CODE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:کد|code|sku|شناسه|مدل|model)\b\s*[:\-#]?\s*([a-z0-9][a-z0-9\-_]*)")
        .expect("valid product code regex")
});

static MODEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:[a-z]+\d[a-z0-9]*|\d+[a-z][a-z0-9]*|\d{1,3}\s+(?:pro|max|plus|پرو|مکس|پلاس)|\d{1,3})\b",
    )
    .expect("valid model regex")
});

static COMPARISON_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)مقایسه|تفاوت|کدوم بهتره|\bبهتره\b|\bبهتر\b|انتخاب بین|\b(?:comparison|compare|versus|vs|difference between)\b")
        .expect("valid comparison regex")
});

static SELLER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)فروشنده|فروشندگان|فروشگاه|مغازه|\b(?:sellers?|shops?|stores?)\b")
        .expect("valid seller regex")
});

static PRICE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)قیمت|چقدر|\bچند\b|هزینه|\b(?:price|cost|how much)\b").expect("valid price regex")
});

static FEATURE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)مشخصات|ویژگی|ابعاد|وزن|رنگ|گارانتی|\b(?:features?|specs|specifications|dimensions|weight|colou?rs?)\b")
        .expect("valid feature regex")
});

static GENERAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)چطور|چگونه|ساعت کاری|مرجوع|پرداخت|ضمانت اصالت|راهنما|\b(?:how to|working hours|returns?|refund|payment|warranty policy)\b")
        .expect("valid general regex")
});

static FIND_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)پیدا کن|برای من پیدا|دنبال|می خواهم|میخواهم|میخوام|می خوام|برگردون|برگردان|نشان بده|نشان دهید|جستجو کن|\b(?:search|find|looking for)\b")
        .expect("valid find regex")
});

static DETAILED_SPECS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)\d+\s*(?:گیگابایت|گیگ|ترابایت|gb|tb)\b|\d+\s*(?:اینچ|inch|")|\d+\s*(?:مگاپیکسل|megapixel|mp)\b|\b(?:pro|max|plus)\b|پرو|مکس|پلاس|\d+\s*(?:رم|ram|حافظه)|(?:dual|دوال)\s*(?:sim|سیم)|\d+\s*(?:هرتز|khz|mhz|hz)\b"#,
    )
    .expect("valid specs regex")
});

/// Fold Arabic letter variants and zero-width joiners into the forms the
/// rules are written in, and collapse whitespace.
pub fn normalize_query(query: &str) -> String {
    let folded: String = query
        .chars()
        .map(|c| match c {
            'ي' | 'ى' => 'ی',
            'ك' => 'ک',
            '\u{200c}' | '\u{200d}' => ' ',
            other => other,
        })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Rule-based signal detector
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternDetector;

impl PatternDetector {
    pub fn new() -> Self {
        Self
    }

    /// Classify `query`, returning a zero-confidence signal when no rule fires
    pub fn detect(&self, query: &str) -> SignalResult {
        if let Some(command) = detect_command(query) {
            return command;
        }

        let text = normalize_query(query);
        if text.is_empty() {
            return SignalResult::none("empty query");
        }

        match detect_rules(&text) {
            Some(RuleMatch {
                agent,
                confidence,
                rule,
                extracted,
            }) => SignalResult::new(agent, confidence, format!("pattern rule '{rule}' matched"))
                .with_extracted(extracted),
            None => SignalResult::none("no pattern rule matched"),
        }
    }

    /// True when `signal` came from an exact command rather than a heuristic
    pub fn is_command(signal: &SignalResult) -> bool {
        signal.extracted.contains_key("command")
    }
}

struct RuleMatch {
    agent: AgentKind,
    confidence: f64,
    rule: &'static str,
    extracted: Extracted,
}

impl RuleMatch {
    fn new(agent: AgentKind, confidence: f64, rule: &'static str) -> Self {
        Self {
            agent,
            confidence,
            rule,
            extracted: Extracted::new(),
        }
    }

    fn with(mut self, key: &str, value: Value) -> Self {
        self.extracted.insert(key.to_string(), value);
        self
    }
}

fn detect_command(query: &str) -> Option<SignalResult> {
    let trimmed = query.trim();
    // ASCII lowercasing keeps byte offsets aligned with `trimmed`
    let lower = trimmed.to_ascii_lowercase();

    if lower == "ping" {
        let mut extracted = Extracted::new();
        extracted.insert("command".to_string(), json!("ping"));
        return Some(
            SignalResult::new(AgentKind::General, COMMAND_CONFIDENCE, "exact command 'ping'")
                .with_extracted(extracted),
        );
    }

    if !lower.starts_with(BASE_KEY_COMMAND) && !lower.starts_with(MEMBER_KEY_COMMAND) {
        return None;
    }

    let base_key = command_key(trimmed, &lower, BASE_KEY_COMMAND, MEMBER_KEY_COMMAND);
    let member_key = command_key(trimmed, &lower, MEMBER_KEY_COMMAND, BASE_KEY_COMMAND);

    let mut extracted = Extracted::new();
    let command = match (&base_key, &member_key) {
        (Some(base), Some(member)) => {
            extracted.insert("base_key".to_string(), json!(base));
            extracted.insert("member_key".to_string(), json!(member));
            "return_combined_keys"
        }
        (Some(key), None) => {
            extracted.insert("key".to_string(), json!(key));
            "return_base_key"
        }
        (None, Some(key)) => {
            extracted.insert("key".to_string(), json!(key));
            "return_member_key"
        }
        (None, None) => return None,
    };
    extracted.insert("command".to_string(), json!(command));
    if let Some(base) = base_key {
        extracted.insert("base_random_keys".to_string(), json!([base]));
    }
    if let Some(member) = member_key {
        extracted.insert("member_random_keys".to_string(), json!([member]));
    }

    Some(
        SignalResult::new(
            AgentKind::General,
            COMMAND_CONFIDENCE,
            format!("exact command '{command}'"),
        )
        .with_extracted(extracted),
    )
}

/// Text following `marker` up to `other` (or the end), with original casing
fn command_key(original: &str, lower: &str, marker: &str, other: &str) -> Option<String> {
    let start = lower.find(marker)? + marker.len();
    let end = lower[start..]
        .find(other)
        .map_or(lower.len(), |offset| start + offset);
    let key = original[start..end].trim();
    (!key.is_empty()).then(|| key.to_string())
}

fn detect_rules(text: &str) -> Option<RuleMatch> {
    let base_ids = extract_base_ids(text);
    if base_ids.len() >= 2 {
        return Some(
            RuleMatch::new(AgentKind::Comparison, 0.9, "multiple_base_ids")
                .with("base_ids", json!(base_ids)),
        );
    }

    let codes = extract_product_codes(text);
    if !codes.is_empty() {
        return Some(
            RuleMatch::new(AgentKind::SpecificItem, 0.9, "explicit_code")
                .with("code", json!(codes[0]))
                .with("product_codes", json!(codes)),
        );
    }

    let brands = extract_brands(text);

    if COMPARISON_RE.is_match(text) {
        let (confidence, rule) = match brands.len() {
            0 => (0.7, "comparison_keywords"),
            1 => (0.75, "comparison_with_brand"),
            _ => (0.85, "comparison_with_brands"),
        };
        let mut matched = RuleMatch::new(AgentKind::Comparison, confidence, rule);
        if !brands.is_empty() {
            matched = matched.with("brands", json!(brands));
        }
        return Some(matched);
    }

    if SELLER_RE.is_match(text) {
        let mut matched = RuleMatch::new(AgentKind::SellerInfo, 0.8, "seller_keywords");
        if !brands.is_empty() {
            matched = matched.with("brands", json!(brands));
        }
        return Some(matched);
    }

    let categories = extract_categories(text);
    let asks_price = PRICE_RE.is_match(text);
    let asks_feature = FEATURE_RE.is_match(text);

    if let [base_id] = base_ids.as_slice() {
        let matched = if asks_price || asks_feature {
            RuleMatch::new(AgentKind::ItemFeature, 0.9, "base_with_feature")
                .with("price_inquiry", json!(asks_price))
        } else {
            RuleMatch::new(AgentKind::SellerInfo, 0.85, "single_base_id")
        };
        return Some(matched.with("base_id", json!(base_id)));
    }

    let mentions_product = !brands.is_empty() || !categories.is_empty();
    if mentions_product && (asks_price || asks_feature) {
        let (confidence, rule) = if asks_price {
            (0.75, "price_with_product")
        } else {
            (0.7, "feature_with_product")
        };
        let mut matched = RuleMatch::new(AgentKind::ItemFeature, confidence, rule)
            .with("price_inquiry", json!(asks_price));
        if !brands.is_empty() {
            matched = matched.with("brands", json!(brands));
        }
        if !categories.is_empty() {
            matched = matched.with("categories", json!(categories));
        }
        return Some(matched);
    }

    if let Some(matched) = detect_specific_item(text, &brands, &categories) {
        return Some(matched);
    }

    if GENERAL_RE.is_match(text) {
        return Some(RuleMatch::new(AgentKind::General, 0.8, "general_keywords"));
    }

    None
}

/// Brand, model and category combinations that name one product
fn detect_specific_item(text: &str, brands: &[String], categories: &[String]) -> Option<RuleMatch> {
    let model = MODEL_RE.find(text).map(|m| m.as_str().to_string());
    let wants_item = FIND_RE.is_match(text);
    let detailed = DETAILED_SPECS_RE.is_match(text);
    let words = text.split_whitespace().count();

    let brand = brands.first();
    let category = categories.first();

    let (confidence, rule) = match (brand, category) {
        (Some(_), _) if model.is_some() => (0.8, "brand_with_model"),
        (Some(_), Some(_)) if wants_item => (0.85, "brand_category_find"),
        (Some(_), Some(_)) if detailed => (0.75, "brand_with_specs"),
        (Some(_), Some(_)) => (0.8, "brand_category"),
        (Some(_), None) if wants_item => (0.8, "brand_find"),
        (Some(_), None) if detailed => (0.7, "detailed_specs"),
        (None, Some(_)) if wants_item && words <= 8 => (0.7, "category_find"),
        (None, Some(_)) if words <= 6 => (0.6, "category_only"),
        _ => return None,
    };

    let mut matched = RuleMatch::new(AgentKind::SpecificItem, confidence, rule);
    if let Some(brand) = brand {
        matched = matched.with("brand", json!(brand));
    }
    if let Some(category) = category {
        matched = matched.with("category", json!(category));
    }
    if let (Some(model), Some(_)) = (model, brand) {
        matched = matched.with("model", json!(model));
    }
    Some(matched)
}

fn push_unique(items: &mut Vec<String>, item: String) {
    if !items.contains(&item) {
        items.push(item);
    }
}

/// Ids after a `base` keyword need an explicit `:`/`-` separator or a digit,
/// so "base price" or "base model" are not read as identifiers.
fn extract_base_ids(text: &str) -> Vec<String> {
    let mut ids = Vec::new();
    for caps in BASE_ID_RE.captures_iter(text) {
        if let Some(id) = caps.get(2) {
            let separated = caps.get(1).is_some();
            if separated || id.as_str().chars().any(|c| c.is_ascii_digit()) {
                push_unique(&mut ids, id.as_str().to_string());
            }
        }
    }
    for caps in SHORT_BASE_ID_RE.captures_iter(text) {
        if let Some(id) = caps.get(1) {
            push_unique(&mut ids, id.as_str().to_string());
        }
    }
    ids
}

/// Codes following an explicit code/sku/model keyword; a code must carry a digit
fn extract_product_codes(text: &str) -> Vec<String> {
    let mut codes = Vec::new();
    for caps in PRODUCT_CODE_RE.captures_iter(text) {
        if let Some(code) = caps.get(1) {
            let code = code.as_str().trim_end_matches(['-', '_']);
            if code.chars().any(|c| c.is_ascii_digit()) {
                push_unique(&mut codes, code.to_string());
            }
        }
    }
    codes
}

fn extract_brands(text: &str) -> Vec<String> {
    let mut brands = Vec::new();
    for found in BRAND_RE.find_iter(text) {
        let surface = found.as_str().to_lowercase();
        if let Some((_, canonical)) = BRANDS.iter().find(|(s, _)| *s == surface) {
            push_unique(&mut brands, (*canonical).to_string());
        }
    }
    brands
}

fn extract_categories(text: &str) -> Vec<String> {
    let mut categories = Vec::new();
    for found in CATEGORY_RE.find_iter(text) {
        push_unique(&mut categories, found.as_str().to_lowercase());
    }
    categories
}
