//! Value/unit scanning over OCR text.
//!
//! Pure functions, no async. The matcher is compiled once from the alias
//! table: aliases are sorted longest first so the regex alternation always
//! prefers "kg" over "g" and "in³" over "in" at the same position.

use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::TableError;
use crate::units::UnitTables;

/// Decimal literal: digits with an optional fractional part.
const NUMBER_PATTERN: &str = r"\d+(?:\.\d+)?";

/// One value/unit occurrence found in text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedPair {
    /// The number exactly as written.
    pub value: String,
    /// Canonical unit name.
    pub unit: String,
}

impl fmt::Display for ExtractedPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit)
    }
}

/// Compiled scanner over a fixed set of unit tables.
#[derive(Debug)]
pub struct UnitScanner {
    tables: Arc<UnitTables>,
    pattern: Regex,
}

impl UnitScanner {
    pub fn new(tables: Arc<UnitTables>) -> Result<Self, TableError> {
        let pattern = build_pattern(&tables)?;
        Ok(Self { tables, pattern })
    }

    /// Scanner over the built-in tables.
    #[cfg(test)]
    pub fn builtin() -> Result<Self, TableError> {
        Self::new(Arc::new(UnitTables::builtin()))
    }

    pub fn tables(&self) -> &UnitTables {
        &self.tables
    }

    /// Every value/unit pair in the text, in reading order.
    pub fn scan(&self, text: &str) -> Vec<ExtractedPair> {
        self.pairs(text).collect()
    }

    /// First pair whose unit is valid for `entity`, or `None` when the entity
    /// is unknown or nothing qualifies.
    pub fn resolve(&self, entity: &str, text: &str) -> Option<ExtractedPair> {
        let Some(valid_units) = self.tables.entity_units(entity) else {
            trace!("Unsupported entity '{}'", entity);
            return None;
        };

        self.pairs(text)
            .find(|pair| valid_units.contains(&pair.unit))
    }

    /// [`UnitScanner::resolve`] formatted as `"value unit"`.
    pub fn predict(&self, entity: &str, text: &str) -> Option<String> {
        self.resolve(entity, text).map(|pair| pair.to_string())
    }

    fn pairs<'t>(&'t self, text: &'t str) -> impl Iterator<Item = ExtractedPair> + 't {
        self.pattern.captures_iter(text).filter_map(move |caps| {
            let value = caps.get(1)?.as_str();
            let unit = caps.get(2)?.as_str();
            Some(ExtractedPair {
                value: value.to_string(),
                unit: self.tables.normalize(unit),
            })
        })
    }
}

/// Compile `<number><spaces><alias>` with aliases ordered longest first.
fn build_pattern(tables: &UnitTables) -> Result<Regex, TableError> {
    let mut aliases: Vec<&str> = tables.aliases().filter(|a| !a.is_empty()).collect();
    if aliases.is_empty() {
        return Err(TableError::EmptyAliasTable);
    }
    aliases.sort_by(|a, b| {
        b.chars()
            .count()
            .cmp(&a.chars().count())
            .then_with(|| a.cmp(b))
    });

    let alternation = aliases
        .iter()
        .map(|alias| alias_pattern(alias))
        .collect::<Vec<_>>()
        .join("|");
    let pattern = Regex::new(&format!(r"(?i)({})\s*({})", NUMBER_PATTERN, alternation))?;

    debug!("Compiled unit pattern from {} aliases", aliases.len());
    Ok(pattern)
}

/// Regex for one alias; words of multi-word aliases may be separated by any
/// amount of whitespace, including none.
fn alias_pattern(alias: &str) -> String {
    alias
        .split_whitespace()
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(r"\s*")
}
