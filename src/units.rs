//! Unit alias table and entity-unit map.
//!
//! Both tables are plain maps held by an immutable [`UnitTables`] value that is
//! built once at startup and handed to the scanner. Tables can come from the
//! built-in definitions below or from a JSON file with the same shape as
//! [`TablesFile`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::TableError;

/// Built-in alias -> canonical unit definitions.
const BUILTIN_ALIASES: &[(&str, &str)] = &[
    // Length
    ("centimetre", "centimetre"),
    ("centimetres", "centimetre"),
    ("centimeter", "centimetre"),
    ("centimeters", "centimetre"),
    ("cm", "centimetre"),
    ("foot", "foot"),
    ("feet", "foot"),
    ("ft", "foot"),
    ("inch", "inch"),
    ("inches", "inch"),
    ("in", "inch"),
    ("metre", "metre"),
    ("metres", "metre"),
    ("meter", "metre"),
    ("meters", "metre"),
    ("m", "metre"),
    ("millimetre", "millimetre"),
    ("millimetres", "millimetre"),
    ("millimeter", "millimetre"),
    ("millimeters", "millimetre"),
    ("mm", "millimetre"),
    ("yard", "yard"),
    ("yards", "yard"),
    ("yd", "yard"),
    // Mass
    ("gram", "gram"),
    ("grams", "gram"),
    ("gramme", "gram"),
    ("g", "gram"),
    ("gm", "gram"),
    ("gms", "gram"),
    ("kilogram", "kilogram"),
    ("kilograms", "kilogram"),
    ("kilo", "kilogram"),
    ("kilos", "kilogram"),
    ("kg", "kilogram"),
    ("kgs", "kilogram"),
    ("microgram", "microgram"),
    ("micrograms", "microgram"),
    ("µg", "microgram"),
    ("milligram", "milligram"),
    ("milligrams", "milligram"),
    ("mg", "milligram"),
    ("ounce", "ounce"),
    ("ounces", "ounce"),
    ("oz", "ounce"),
    ("pound", "pound"),
    ("pounds", "pound"),
    ("lb", "pound"),
    ("lbs", "pound"),
    ("ton", "ton"),
    ("tons", "ton"),
    ("tonne", "ton"),
    ("tonnes", "ton"),
    ("t", "ton"),
    // Voltage
    ("kilovolt", "kilovolt"),
    ("kilovolts", "kilovolt"),
    ("kv", "kilovolt"),
    ("millivolt", "millivolt"),
    ("millivolts", "millivolt"),
    ("mv", "millivolt"),
    ("volt", "volt"),
    ("volts", "volt"),
    ("v", "volt"),
    // Wattage
    ("kilowatt", "kilowatt"),
    ("kilowatts", "kilowatt"),
    ("kw", "kilowatt"),
    ("watt", "watt"),
    ("watts", "watt"),
    ("w", "watt"),
    // Volume
    ("centilitre", "centilitre"),
    ("centilitres", "centilitre"),
    ("cl", "centilitre"),
    ("cubic foot", "cubic foot"),
    ("cubic feet", "cubic foot"),
    ("ft³", "cubic foot"),
    ("cubic inch", "cubic inch"),
    ("cubic inches", "cubic inch"),
    ("in³", "cubic inch"),
    ("cup", "cup"),
    ("cups", "cup"),
    ("c", "cup"),
    ("decilitre", "decilitre"),
    ("decilitres", "decilitre"),
    ("dl", "decilitre"),
    ("fluid ounce", "fluid ounce"),
    ("fluid ounces", "fluid ounce"),
    ("fl oz", "fluid ounce"),
    ("gallon", "gallon"),
    ("gallons", "gallon"),
    ("gal", "gallon"),
    ("imperial gallon", "imperial gallon"),
    ("imperial gallons", "imperial gallon"),
    ("imp gal", "imperial gallon"),
    ("kilolitre", "kilolitre"),
    ("kilolitres", "kilolitre"),
    ("kl", "kilolitre"),
    ("litre", "litre"),
    ("litres", "litre"),
    ("liter", "litre"),
    ("liters", "litre"),
    ("l", "litre"),
    ("microlitre", "microlitre"),
    ("microlitres", "microlitre"),
    ("µl", "microlitre"),
    ("millilitre", "millilitre"),
    ("millilitres", "millilitre"),
    ("ml", "millilitre"),
    ("pint", "pint"),
    ("pints", "pint"),
    ("pt", "pint"),
    ("quart", "quart"),
    ("quarts", "quart"),
    ("qt", "quart"),
];

const LENGTH_UNITS: &[&str] = &["centimetre", "foot", "inch", "metre", "millimetre", "yard"];
const MASS_UNITS: &[&str] = &[
    "gram",
    "kilogram",
    "microgram",
    "milligram",
    "ounce",
    "pound",
    "ton",
];
const VOLUME_UNITS: &[&str] = &[
    "centilitre",
    "cubic foot",
    "cubic inch",
    "cup",
    "decilitre",
    "fluid ounce",
    "gallon",
    "imperial gallon",
    "litre",
    "microlitre",
    "millilitre",
    "pint",
    "quart",
];

/// Built-in entity -> valid canonical units.
const BUILTIN_ENTITIES: &[(&str, &[&str])] = &[
    ("width", LENGTH_UNITS),
    ("depth", LENGTH_UNITS),
    ("height", LENGTH_UNITS),
    ("item_weight", MASS_UNITS),
    ("maximum_weight_recommendation", MASS_UNITS),
    ("voltage", &["kilovolt", "millivolt", "volt"]),
    ("wattage", &["kilowatt", "watt"]),
    ("item_volume", VOLUME_UNITS),
];

/// On-disk shape of the unit tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TablesFile {
    pub aliases: BTreeMap<String, String>,
    pub entities: BTreeMap<String, BTreeSet<String>>,
}

/// Immutable alias and entity tables shared by every scan.
#[derive(Debug, Clone)]
pub struct UnitTables {
    aliases: BTreeMap<String, String>,
    entities: BTreeMap<String, BTreeSet<String>>,
    /// Folded alias -> canonical unit.
    lookup: HashMap<String, String>,
}

impl UnitTables {
    /// Build tables from raw maps. Alias keys are lowercased and their inner
    /// whitespace collapsed. Call [`UnitTables::validate`] before trusting
    /// tables that did not come from [`UnitTables::builtin`].
    pub fn new(
        aliases: impl IntoIterator<Item = (String, String)>,
        entities: impl IntoIterator<Item = (String, BTreeSet<String>)>,
    ) -> Self {
        let aliases: BTreeMap<String, String> = aliases
            .into_iter()
            .map(|(alias, canonical)| (clean_alias(&alias), canonical))
            .collect();

        let mut lookup = HashMap::with_capacity(aliases.len());
        for (alias, canonical) in &aliases {
            lookup
                .entry(fold_key(alias))
                .or_insert_with(|| canonical.clone());
        }

        Self {
            aliases,
            entities: entities.into_iter().collect(),
            lookup,
        }
    }

    /// The tables compiled into the binary.
    pub fn builtin() -> Self {
        Self::new(
            BUILTIN_ALIASES
                .iter()
                .map(|(alias, canonical)| (alias.to_string(), canonical.to_string())),
            BUILTIN_ENTITIES.iter().map(|(entity, units)| {
                (
                    entity.to_string(),
                    units.iter().map(|u| u.to_string()).collect(),
                )
            }),
        )
    }

    /// Parse and validate tables from JSON.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let file: TablesFile =
            serde_json::from_str(json).context("Failed to parse unit tables JSON")?;
        let tables = Self::new(file.aliases, file.entities);
        tables.validate()?;
        Ok(tables)
    }

    /// Load tables from a JSON file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read unit tables: {:?}", path))?;
        let tables = Self::from_json_str(&content)
            .with_context(|| format!("Invalid unit tables in {:?}", path))?;
        info!(
            "Loaded {} aliases and {} entities from {:?}",
            tables.aliases.len(),
            tables.entities.len(),
            path
        );
        Ok(tables)
    }

    /// Check the closed-world invariants of the tables.
    pub fn validate(&self) -> Result<(), TableError> {
        if self.aliases.is_empty() {
            return Err(TableError::EmptyAliasTable);
        }

        let mut folded: HashMap<String, &String> = HashMap::new();
        for (alias, canonical) in &self.aliases {
            if alias.is_empty() {
                return Err(TableError::BlankAlias {
                    canonical: canonical.clone(),
                });
            }
            if let Some(first) = folded.insert(fold_key(alias), canonical) {
                if first != canonical {
                    return Err(TableError::ConflictingAlias {
                        alias: alias.clone(),
                        first: first.clone(),
                        second: canonical.clone(),
                    });
                }
            }
        }

        for canonical in self.aliases.values() {
            if self.canonical(canonical) != Some(canonical.as_str()) {
                return Err(TableError::CanonicalNotSelfMapped {
                    canonical: canonical.clone(),
                });
            }
        }

        for (entity, units) in &self.entities {
            if units.is_empty() {
                return Err(TableError::EmptyEntity {
                    entity: entity.clone(),
                });
            }
            for unit in units {
                if !self.aliases.values().any(|c| c == unit) {
                    return Err(TableError::UnknownEntityUnit {
                        entity: entity.clone(),
                        unit: unit.clone(),
                    });
                }
            }
        }

        debug!(
            "Unit tables valid: {} aliases, {} entities",
            self.aliases.len(),
            self.entities.len()
        );
        Ok(())
    }

    /// Canonical unit for a token, if the token is a known alias.
    pub fn canonical(&self, token: &str) -> Option<&str> {
        self.lookup.get(&fold_key(token)).map(String::as_str)
    }

    /// Canonical unit for a token, or the token itself when it is not a known alias.
    pub fn normalize(&self, token: &str) -> String {
        match self.canonical(token) {
            Some(canonical) => canonical.to_string(),
            None => token.to_string(),
        }
    }

    /// Valid units for an entity. Entity names are matched exactly.
    pub fn entity_units(&self, entity: &str) -> Option<&BTreeSet<String>> {
        self.entities.get(entity)
    }

    pub fn entities(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.entities
    }

    /// Known alias spellings (lowercase, single-spaced).
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.aliases.keys().map(String::as_str)
    }

    pub fn to_file(&self) -> TablesFile {
        TablesFile {
            aliases: self.aliases.clone(),
            entities: self.entities.clone(),
        }
    }
}

/// Lowercase an alias and collapse runs of whitespace to one space.
fn clean_alias(alias: &str) -> String {
    alias
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Lookup key: whitespace removed, case folded, Greek mu read as the micro sign.
///
/// Folding goes through the uppercase form first so characters the matcher's
/// case-insensitive mode treats as equal share one key ("ſ" and "s", the
/// Kelvin sign and "k").
fn fold_key(token: &str) -> String {
    let mut key = String::with_capacity(token.len());
    for c in token.chars().filter(|c| !c.is_whitespace()) {
        let mut upper = c.to_uppercase();
        let simple = match (upper.next(), upper.next()) {
            (Some(u), None) => u,
            _ => c,
        };
        for lower in simple.to_lowercase() {
            key.push(if lower == '\u{03BC}' { '\u{00B5}' } else { lower });
        }
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_tables(aliases: &[(&str, &str)], entities: &[(&str, &[&str])]) -> UnitTables {
        UnitTables::new(
            aliases.iter().map(|(a, c)| (a.to_string(), c.to_string())),
            entities.iter().map(|(e, units)| {
                (e.to_string(), units.iter().map(|u| u.to_string()).collect())
            }),
        )
    }

    #[test]
    fn test_builtin_tables_are_consistent() {
        UnitTables::builtin().validate().unwrap();
    }

    #[test]
    fn test_normalize_is_case_insensitive() {
        let tables = UnitTables::builtin();
        assert_eq!(tables.normalize("CM"), "centimetre");
        assert_eq!(tables.normalize("Cm"), "centimetre");
        assert_eq!(tables.normalize("KGS"), "kilogram");
    }

    #[test]
    fn test_normalize_passes_unknown_token_through() {
        let tables = UnitTables::builtin();
        assert_eq!(tables.normalize("Furlong"), "Furlong");
        assert_eq!(tables.canonical("furlong"), None);
    }

    #[test]
    fn test_normalize_flexible_whitespace() {
        let tables = UnitTables::builtin();
        assert_eq!(tables.normalize("cubicfoot"), "cubic foot");
        assert_eq!(tables.normalize("Cubic   Feet"), "cubic foot");
        assert_eq!(tables.normalize("fl\toz"), "fluid ounce");
    }

    #[test]
    fn test_normalize_case_fold_variants() {
        let tables = UnitTables::builtin();
        assert_eq!(tables.normalize("lb\u{017F}"), "pound");
        assert_eq!(tables.normalize("\u{212A}g"), "kilogram");
        assert_eq!(tables.normalize("\u{00B5}G"), "microgram");
    }

    #[test]
    fn test_normalize_micro_sign_variants() {
        let tables = UnitTables::builtin();
        assert_eq!(tables.normalize("µg"), "microgram");
        assert_eq!(tables.normalize("\u{03BC}g"), "microgram");
        assert_eq!(tables.normalize("\u{039C}L"), "microlitre");
    }

    #[test]
    fn test_kilolitre_belongs_to_no_entity() {
        let tables = UnitTables::builtin();
        assert_eq!(tables.normalize("kl"), "kilolitre");
        assert!(tables
            .entities()
            .values()
            .all(|units| !units.contains("kilolitre")));
    }

    #[test]
    fn test_unknown_entity() {
        let tables = UnitTables::builtin();
        assert!(tables.entity_units("color").is_none());
        assert!(tables.entity_units("Width").is_none());
        assert!(tables.entity_units("width").is_some());
    }

    #[test]
    fn test_validate_rejects_missing_self_mapping() {
        let tables = small_tables(&[("kl", "kiloleter")], &[]);
        assert!(matches!(
            tables.validate(),
            Err(TableError::CanonicalNotSelfMapped { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_unknown_entity_unit() {
        let tables = small_tables(&[("cm", "centimetre"), ("centimetre", "centimetre")], &[(
            "width",
            &["centimetre", "inch"],
        )]);
        match tables.validate() {
            Err(TableError::UnknownEntityUnit { entity, unit }) => {
                assert_eq!(entity, "width");
                assert_eq!(unit, "inch");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_conflicting_folded_aliases() {
        let tables = small_tables(
            &[
                ("fl oz", "fluid ounce"),
                ("fluid ounce", "fluid ounce"),
                ("floz", "flozzle"),
                ("flozzle", "flozzle"),
            ],
            &[],
        );
        assert!(matches!(
            tables.validate(),
            Err(TableError::ConflictingAlias { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_empty_tables() {
        let tables = small_tables(&[], &[]);
        assert!(matches!(tables.validate(), Err(TableError::EmptyAliasTable)));

        let tables = small_tables(&[("v", "volt"), ("volt", "volt")], &[("voltage", &[])]);
        assert!(matches!(tables.validate(), Err(TableError::EmptyEntity { .. })));
    }

    #[test]
    fn test_from_json_str() {
        let json = r#"{
            "aliases": {"V": "volt", "volt": "volt", "Volts": "volt"},
            "entities": {"voltage": ["volt"]}
        }"#;
        let tables = UnitTables::from_json_str(json).unwrap();
        assert_eq!(tables.normalize("volts"), "volt");
        assert!(tables.aliases().all(|a| a == a.to_lowercase()));
        assert!(tables.entity_units("voltage").unwrap().contains("volt"));
    }

    #[test]
    fn test_from_json_str_rejects_invalid_tables() {
        let json = r#"{"aliases": {"v": "volt"}, "entities": {}}"#;
        assert!(UnitTables::from_json_str(json).is_err());
        assert!(UnitTables::from_json_str("not json").is_err());
    }

    #[test]
    fn test_builtin_round_trips_through_file_shape() {
        let tables = UnitTables::builtin();
        let json = serde_json::to_string(&tables.to_file()).unwrap();
        let reloaded = UnitTables::from_json_str(&json).unwrap();
        assert_eq!(reloaded.entities(), tables.entities());
    }
}
