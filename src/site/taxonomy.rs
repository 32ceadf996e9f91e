//! Breadcrumb label to directory code lookup.
//!
//! The tables are plain data so new site categories can be added from the
//! config file without code changes.

use std::collections::HashMap;

/// Code used for labels that have no mapping.
pub const UNKNOWN_CODE: &str = "unknown";

const DEFAULT_CATEGORIES: [(&str, &str); 7] = [
    ("單行本", "volume"),
    ("雜誌&短篇", "short"),
    ("同人誌", "doujin"),
    ("AI圖集", "AI"),
    ("3D&漫畫", "3D"),
    ("寫真&Cosplay", "photo"),
    ("韓漫", "Korean"),
];

const DEFAULT_LANGUAGES: [(&str, &str); 6] = [
    ("漢化", "CN"),
    ("日語", "JP"),
    ("CG畫集", "CG"),
    ("Cosplay", "COS"),
    ("English", "EN"),
    ("生肉", "Other"),
];

/// Category and language lookup tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Taxonomy {
    categories: HashMap<String, String>,
    languages: HashMap<String, String>,
}

impl Default for Taxonomy {
    fn default() -> Self {
        Self {
            categories: to_table(&DEFAULT_CATEGORIES),
            languages: to_table(&DEFAULT_LANGUAGES),
        }
    }
}

fn to_table(entries: &[(&str, &str)]) -> HashMap<String, String> {
    entries
        .iter()
        .map(|(label, code)| ((*label).to_string(), (*code).to_string()))
        .collect()
}

impl Taxonomy {
    /// Adds or replaces a category mapping.
    pub fn insert_category(&mut self, label: impl Into<String>, code: impl Into<String>) {
        self.categories.insert(label.into(), code.into());
    }

    /// Adds or replaces a language mapping.
    pub fn insert_language(&mut self, label: impl Into<String>, code: impl Into<String>) {
        self.languages.insert(label.into(), code.into());
    }

    /// Directory code for a category label, [`UNKNOWN_CODE`] if unmapped.
    #[must_use]
    pub fn category(&self, label: &str) -> &str {
        self.categories
            .get(label.trim())
            .map_or(UNKNOWN_CODE, String::as_str)
    }

    /// Directory code for a language label, [`UNKNOWN_CODE`] if unmapped.
    #[must_use]
    pub fn language(&self, label: &str) -> &str {
        self.languages
            .get(label.trim())
            .map_or(UNKNOWN_CODE, String::as_str)
    }
}
