//! Detection rules: keyword lists and known gift constructors.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while loading or validating detection rules.
#[derive(Debug, Error)]
pub enum RulesError {
    #[error("Entry {index} of '{list}' is empty")]
    EmptyEntry { list: &'static str, index: usize },

    #[error("Duplicate entry in '{list}': {value}")]
    Duplicate { list: &'static str, value: String },

    #[error("List '{list}' must not be empty")]
    EmptyList { list: &'static str },

    #[error("Failed to read rules file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse rules file: {0}")]
    ParseError(#[from] serde_json::Error),
}

/// Heuristic word lists used by the gift classifier.
///
/// All matching is case-insensitive; entries are stored as written and
/// lowered at match time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DetectionRules {
    /// Phrases that mark a plain-text message as a gift notice.
    #[serde(default = "default_text_indicators")]
    pub text_indicators: Vec<String>,

    /// Looser words matched in text and captions.
    #[serde(default = "default_gift_keywords")]
    pub gift_keywords: Vec<String>,

    /// Words matched against sticker file names.
    #[serde(default = "default_sticker_keywords")]
    pub sticker_keywords: Vec<String>,

    /// Emoji accepted by extended detection.
    #[serde(default = "default_extended_emoji")]
    pub extended_emoji: Vec<String>,

    /// Lowercased constructor names of gift service actions.
    #[serde(default = "default_gift_actions")]
    pub gift_actions: Vec<String>,

    /// Gift ids flagged as rare in replies.
    #[serde(default)]
    pub rare_gift_ids: Vec<i64>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_owned()).collect()
}

fn default_text_indicators() -> Vec<String> {
    strings(&[
        "🎁",
        "sent you a gift",
        "отправил вам подарок",
        "star gift",
        "unique gift",
    ])
}

fn default_gift_keywords() -> Vec<String> {
    strings(&["gift", "подарок", "present", "star gift", "premium gift"])
}

fn default_sticker_keywords() -> Vec<String> {
    strings(&["gift", "present", "star"])
}

fn default_extended_emoji() -> Vec<String> {
    strings(&["🎁", "🎉", "🎊", "💝", "🎀"])
}

fn default_gift_actions() -> Vec<String> {
    strings(&[
        "messageactionstargift",
        "messageactionstargiftunique",
        "messageactiongiftpremium",
        "messageactiongiftcode",
        "messageactiongiftstars",
        "messageactiongiftton",
        "messageactionprizestars",
    ])
}

impl Default for DetectionRules {
    fn default() -> Self {
        Self {
            text_indicators: default_text_indicators(),
            gift_keywords: default_gift_keywords(),
            sticker_keywords: default_sticker_keywords(),
            extended_emoji: default_extended_emoji(),
            gift_actions: default_gift_actions(),
            rare_gift_ids: Vec::new(),
        }
    }
}

impl DetectionRules {
    /// Loads rules from a JSON file. Missing lists fall back to the built-in ones.
    ///
    /// # Errors
    ///
    /// Returns [`RulesError::IoError`] if the file cannot be read and
    /// [`RulesError::ParseError`] if it is not valid rules JSON.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, RulesError> {
        let content = std::fs::read_to_string(path)?;
        let rules: Self = serde_json::from_str(&content)?;
        Ok(rules)
    }

    /// Saves rules to a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`RulesError::IoError`] if the file cannot be written.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), RulesError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Named string lists, in the order they are validated.
    #[must_use]
    pub fn lists(&self) -> [(&'static str, &[String]); 5] {
        [
            ("text_indicators", self.text_indicators.as_slice()),
            ("gift_keywords", self.gift_keywords.as_slice()),
            ("sticker_keywords", self.sticker_keywords.as_slice()),
            ("extended_emoji", self.extended_emoji.as_slice()),
            ("gift_actions", self.gift_actions.as_slice()),
        ]
    }

    /// Validates the rules, failing on the first problem.
    ///
    /// # Errors
    ///
    /// Returns the first empty entry, duplicate or empty required list.
    pub fn validate(&self) -> Result<(), RulesError> {
        self.validate_all().into_iter().try_for_each(|r| r)
    }

    /// Returns one result per problem found (a single `Ok` when clean).
    #[must_use]
    pub fn validate_all(&self) -> Vec<Result<(), RulesError>> {
        let mut results = Vec::new();

        for (list, entries) in self.lists() {
            if list == "gift_actions" && entries.is_empty() {
                results.push(Err(RulesError::EmptyList { list }));
                continue;
            }

            let mut seen = HashSet::new();
            for (index, entry) in entries.iter().enumerate() {
                let normalized = entry.trim().to_lowercase();
                if normalized.is_empty() {
                    results.push(Err(RulesError::EmptyEntry { list, index }));
                } else if !seen.insert(normalized) {
                    results.push(Err(RulesError::Duplicate {
                        list,
                        value: entry.clone(),
                    }));
                }
            }
        }

        let mut seen_ids = HashSet::new();
        for id in &self.rare_gift_ids {
            if !seen_ids.insert(id) {
                results.push(Err(RulesError::Duplicate {
                    list: "rare_gift_ids",
                    value: id.to_string(),
                }));
            }
        }

        if results.is_empty() {
            results.push(Ok(()));
        }
        results
    }

    /// Total number of entries across all lists.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lists().iter().map(|(_, l)| l.len()).sum::<usize>() + self.rare_gift_ids.len()
    }

    /// Returns true if every list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Example rules written by `--generate-rules`.
    #[must_use]
    pub fn example() -> Self {
        Self {
            rare_gift_ids: vec![5_170_145_012_310_081_615, 5_170_233_102_089_322_756],
            ..Self::default()
        }
    }
}
