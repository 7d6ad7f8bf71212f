//! Labelled reference queries used as similarity anchors

use super::agent_kind::AgentKind;
use crate::config::ExemplarSection;
use crate::error::{RouterError, RouterResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// One labelled reference query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exemplar {
    pub agent: AgentKind,
    pub text: String,
}

impl Exemplar {
    pub fn new(agent: AgentKind, text: impl Into<String>) -> Self {
        Self {
            agent,
            text: text.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExemplarFile {
    #[serde(default)]
    exemplars: Vec<Exemplar>,
}

const BUILTIN: &[(AgentKind, &str)] = &[
    // General: store policy, greetings, help
    (AgentKind::General, "سلام، چطور می‌تونم از سایت خرید کنم؟"),
    (AgentKind::General, "ساعت کاری پشتیبانی چه زمانی است؟"),
    (AgentKind::General, "آیا امکان مرجوع کردن کالا وجود دارد؟"),
    (AgentKind::General, "نحوه پرداخت چگونه است؟"),
    (AgentKind::General, "آیا ضمانت اصالت کالا دارید؟"),
    (AgentKind::General, "سلام خوبی؟"),
    (AgentKind::General, "کمک میخوام"),
    (AgentKind::General, "این سایت چیکار میکنه؟"),
    (AgentKind::General, "How do I return an item I bought?"),
    (AgentKind::General, "What payment methods do you accept?"),
    // Specific item
    (AgentKind::SpecificItem, "لطفا کابینت چهار کشو کد D14 رو برام پیدا کن"),
    (AgentKind::SpecificItem, "محصول با شناسه SKU-12345 را نشان بده"),
    (AgentKind::SpecificItem, "دنبال لپ تاپ ASUS مدل X515EA هستم"),
    (AgentKind::SpecificItem, "گوشی آیفون 15 پرو مکس 256 گیگ رو میخوام"),
    (AgentKind::SpecificItem, "یخچال ساید بای ساید سامسونگ مدل RS66 رو برام پیدا کن"),
    (AgentKind::SpecificItem, "Find me the Samsung Galaxy A54 128GB in black"),
    // Item feature
    (AgentKind::ItemFeature, "قیمت پارچه لیکرا حلقوی نوریس 1/30 طلایی چقدره؟"),
    (AgentKind::ItemFeature, "مشخصات فنی تلویزیون سونی X90J رو میخوام"),
    (AgentKind::ItemFeature, "ابعاد و وزن ماشین لباسشویی بوش 8 کیلو چقدره؟"),
    (AgentKind::ItemFeature, "رنگ‌های موجود کفش نایک ایرمکس چیه؟"),
    (AgentKind::ItemFeature, "گارانتی لپ تاپ دل اینسپایرون چند ساله؟"),
    (AgentKind::ItemFeature, "What is the screen size and battery capacity of this tablet?"),
    // Seller info
    (AgentKind::SellerInfo, "فروشندگان گوشی سامسونگ A54 در ترب کدومن؟"),
    (AgentKind::SellerInfo, "کدوم فروشگاه‌ها تبلت آیپد دارن؟"),
    (AgentKind::SellerInfo, "بهترین فروشنده لوازم آشپزخانه کیه؟"),
    (AgentKind::SellerInfo, "فروشگاه‌های معتبر برای خرید موبایل؟"),
    (AgentKind::SellerInfo, "آیا فروشنده دیجی‌کالا محصول X را دارد؟"),
    (AgentKind::SellerInfo, "Which shops in Tehran sell this item and at what price?"),
    // Exploration
    (AgentKind::Exploration, "یه لپ تاپ خوب برای برنامه نویسی میخوام"),
    (AgentKind::Exploration, "دنبال یخچال مناسب برای خونه کوچیک هستم"),
    (AgentKind::Exploration, "بهترین گوشی تا 10 میلیون تومان؟"),
    (AgentKind::Exploration, "کفش ورزشی راحت برای دویدن میخوام"),
    (AgentKind::Exploration, "هدفون بی‌سیم با کیفیت صدای عالی"),
    (AgentKind::Exploration, "I need a good gift for my father, not sure what"),
    // Comparison
    (AgentKind::Comparison, "مقایسه آیفون 15 با سامسونگ S24 اولترا"),
    (AgentKind::Comparison, "تفاوت بین ماشین لباسشویی ال جی و سامسونگ 8 کیلو"),
    (AgentKind::Comparison, "کدوم بهتره؟ لپ تاپ ایسوس ROG یا MSI Gaming"),
    (AgentKind::Comparison, "مقایسه قیمت و کیفیت تلویزیون سونی و ال جی 55 اینچ"),
    (AgentKind::Comparison, "بین این سه مدل یخچال کدوم رو پیشنهاد میدی؟"),
    (AgentKind::Comparison, "Which of these two laptops has the better battery life?"),
    // Other: out of domain
    (AgentKind::Other, "هوای فردا تهران چطوره؟"),
    (AgentKind::Other, "یه شعر درباره پاییز بنویس"),
    (AgentKind::Other, "Who won the football match last night?"),
    (AgentKind::Other, "Translate this paragraph into French"),
];

/// The reference corpus the semantic router indexes
#[derive(Debug, Clone, Default)]
pub struct ExemplarSet {
    exemplars: Vec<Exemplar>,
}

impl ExemplarSet {
    /// Built-in corpus covering every agent kind
    pub fn builtin() -> Self {
        Self {
            exemplars: BUILTIN
                .iter()
                .map(|(agent, text)| Exemplar::new(*agent, *text))
                .collect(),
        }
    }

    pub fn from_exemplars(exemplars: Vec<Exemplar>) -> Self {
        Self { exemplars }
    }

    /// Built-in corpus plus the optional file named in configuration, validated
    pub fn from_config(section: &ExemplarSection) -> RouterResult<Self> {
        let mut set = Self::builtin();
        if let Some(path) = &section.path {
            let extra = Self::load_file(path)?;
            info!(path = %path.display(), count = extra.len(), "Loaded extra exemplars");
            set.extend(extra);
        }
        set.validate()?;
        Ok(set)
    }

    /// Read `[[exemplars]]` entries from a TOML file
    pub fn load_file(path: &Path) -> RouterResult<Vec<Exemplar>> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RouterError::invalid_configuration(format!(
                "Failed to read exemplar file {}: {e}",
                path.display()
            ))
        })?;
        Self::parse_toml(&content)
    }

    pub fn parse_toml(content: &str) -> RouterResult<Vec<Exemplar>> {
        let file: ExemplarFile = toml::from_str(content).map_err(|e| {
            RouterError::invalid_configuration(format!("Invalid exemplar file: {e}"))
        })?;
        Ok(file.exemplars)
    }

    pub fn extend(&mut self, exemplars: impl IntoIterator<Item = Exemplar>) {
        self.exemplars.extend(exemplars);
    }

    /// Every agent kind needs at least one exemplar and no text may be blank
    pub fn validate(&self) -> RouterResult<()> {
        if let Some(blank) = self.exemplars.iter().find(|e| e.text.trim().is_empty()) {
            return Err(RouterError::invalid_configuration(format!(
                "Exemplar for agent '{}' has empty text",
                blank.agent
            )));
        }

        let counts = self.counts();
        let missing: Vec<String> = AgentKind::PRIORITY
            .iter()
            .filter(|kind| !counts.contains_key(kind))
            .map(|kind| kind.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(RouterError::invalid_configuration(format!(
                "No exemplars for agent kinds: {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }

    /// Number of exemplars per agent kind
    pub fn counts(&self) -> BTreeMap<AgentKind, usize> {
        let mut counts = BTreeMap::new();
        for exemplar in &self.exemplars {
            *counts.entry(exemplar.agent).or_insert(0) += 1;
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.exemplars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exemplars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Exemplar> {
        self.exemplars.iter()
    }

    pub fn texts(&self) -> Vec<String> {
        self.exemplars.iter().map(|e| e.text.clone()).collect()
    }

    pub fn for_agent(&self, agent: AgentKind) -> impl Iterator<Item = &Exemplar> {
        self.exemplars.iter().filter(move |e| e.agent == agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_builtin_covers_every_kind() {
        let set = ExemplarSet::builtin();
        assert!(set.validate().is_ok());
        for kind in AgentKind::PRIORITY {
            assert!(set.for_agent(kind).count() >= 1, "{kind} has no exemplar");
        }
    }

    #[test]
    fn test_missing_kind_rejected() {
        let set = ExemplarSet::from_exemplars(vec![Exemplar::new(AgentKind::General, "hello")]);
        let err = set.validate().unwrap_err();
        assert!(matches!(err, RouterError::InvalidConfiguration { .. }));
        assert!(err.to_string().contains("comparison"));
    }

    #[test]
    fn test_blank_text_rejected() {
        let mut set = ExemplarSet::builtin();
        set.extend([Exemplar::new(AgentKind::Other, "   ")]);
        assert!(set.validate().is_err());
    }

    #[test]
    fn test_parse_toml() {
        let exemplars = ExemplarSet::parse_toml(
            r#"
            [[exemplars]]
            agent = "comparison"
            text = "galaxy or pixel?"

            [[exemplars]]
            agent = "seller_info"
            text = "who stocks this?"
            "#,
        )
        .unwrap();
        assert_eq!(exemplars.len(), 2);
        assert_eq!(exemplars[0].agent, AgentKind::Comparison);
    }

    #[test]
    fn test_unknown_agent_in_file_fails() {
        let result = ExemplarSet::parse_toml(
            r#"
            [[exemplars]]
            agent = "warehouse"
            text = "where is my parcel"
            "#,
        );
        assert!(matches!(
            result,
            Err(RouterError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_from_config_appends_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[[exemplars]]\nagent = \"other\"\ntext = \"tell me a joke\""
        )
        .unwrap();

        let section = ExemplarSection {
            path: Some(file.path().to_path_buf()),
        };
        let set = ExemplarSet::from_config(&section).unwrap();
        assert_eq!(set.len(), ExemplarSet::builtin().len() + 1);
        assert!(set.iter().any(|e| e.text == "tell me a joke"));
    }
}
