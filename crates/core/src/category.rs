use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_FALLBACK_CATEGORY: &str = "Other";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CategoryTableError {
    #[error("Failed to parse category table: {0}")]
    Parse(String),
    #[error("Category at position {0} has an empty label")]
    EmptyLabel(usize),
    #[error("Category '{0}' has no keywords")]
    NoKeywords(String),
    #[error("Category '{0}' contains a blank keyword")]
    BlankKeyword(String),
    #[error("Category '{0}' is defined more than once")]
    DuplicateLabel(String),
}

/// One entry of the category vocabulary: a label and the keywords that select it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CategoryRule {
    pub label: String,
    pub keywords: Vec<String>,
}

impl CategoryRule {
    pub fn new(label: impl Into<String>, keywords: &[&str]) -> Self {
        Self {
            label: label.into(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CategoryTableFile {
    #[serde(default = "default_fallback")]
    fallback: String,
    #[serde(default, rename = "category")]
    categories: Vec<CategoryRule>,
}

fn default_fallback() -> String {
    DEFAULT_FALLBACK_CATEGORY.to_string()
}

/// Ordered keyword table used to label receipts.
///
/// Matching is case-insensitive substring containment. Rules are tried in
/// table order and the first rule with any matching keyword wins, so the
/// same text always yields the same label for a given table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryTable {
    rules: Vec<CategoryRule>,
    fallback: String,
}

impl Default for CategoryTable {
    fn default() -> Self {
        Self {
            rules: vec![
                CategoryRule::new("Groceries", &["grocery", "supermarket", "food"]),
                CategoryRule::new("Transportation", &["gas", "fuel", "transport"]),
                CategoryRule::new("Dining Out", &["restaurant", "cafe", "dining"]),
            ],
            fallback: default_fallback(),
        }
    }
}

impl CategoryTable {
    pub fn new(
        rules: Vec<CategoryRule>,
        fallback: impl Into<String>,
    ) -> Result<Self, CategoryTableError> {
        let mut normalized: Vec<CategoryRule> = Vec::with_capacity(rules.len());
        for (idx, rule) in rules.into_iter().enumerate() {
            let label = rule.label.trim().to_string();
            if label.is_empty() {
                return Err(CategoryTableError::EmptyLabel(idx));
            }
            if normalized.iter().any(|r| r.label.eq_ignore_ascii_case(&label)) {
                return Err(CategoryTableError::DuplicateLabel(label));
            }
            if rule.keywords.is_empty() {
                return Err(CategoryTableError::NoKeywords(label));
            }
            let mut keywords = Vec::with_capacity(rule.keywords.len());
            for kw in &rule.keywords {
                let kw = kw.trim().to_lowercase();
                if kw.is_empty() {
                    return Err(CategoryTableError::BlankKeyword(label));
                }
                keywords.push(kw);
            }
            normalized.push(CategoryRule { label, keywords });
        }

        let fallback = fallback.into().trim().to_string();
        let fallback = if fallback.is_empty() { default_fallback() } else { fallback };

        Ok(Self { rules: normalized, fallback })
    }

    pub fn from_toml(toml_content: &str) -> Result<Self, CategoryTableError> {
        let file: CategoryTableFile =
            toml::from_str(toml_content).map_err(|e| CategoryTableError::Parse(e.to_string()))?;
        Self::new(file.categories, file.fallback)
    }

    pub fn rules(&self) -> &[CategoryRule] {
        &self.rules
    }

    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    /// First rule (in table order) with a keyword contained in `text`.
    pub fn find_matching_rule(&self, text: &str) -> Option<&CategoryRule> {
        let text = text.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.keywords.iter().any(|kw| text.contains(kw.as_str())))
    }

    /// Label for `text`, or the fallback label when nothing matches.
    pub fn classify(&self, text: &str) -> &str {
        self.find_matching_rule(text)
            .map(|r| r.label.as_str())
            .unwrap_or(&self.fallback)
    }

    /// Every label this table can produce, fallback last.
    pub fn labels(&self) -> Vec<&str> {
        self.rules
            .iter()
            .map(|r| r.label.as_str())
            .chain(std::iter::once(self.fallback.as_str()))
            .collect()
    }
}
