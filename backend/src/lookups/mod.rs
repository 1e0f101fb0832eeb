//! Lookup tables: company, job title and situation reference data.
//!
//! The tables live in a versioned TOML file rather than in code. A default
//! copy is embedded at compile time from `lookups/default.toml`; deployments
//! can point at their own file instead.
//!
//! # File layout
//!
//! ```toml
//! version = "2025.1"
//!
//! [defaults]
//! other_classification = "OUT"
//! unknown_company_prefix = "0"
//! hours_worked = 8
//!
//! [companies."ACME FLORESTAL LTDA"]
//! tax_id = "00.000.000/0001-00"
//! prefix = "5"
//!
//! [classifications]
//! "MOTORISTA" = "MCM"
//!
//! [functions]
//! "MOTORISTA" = "MOTORISTA"
//!
//! [situations]
//! confirmed = false
//! terminated = 8
//!
//! [situations.labels]
//! "1" = "Trabalhando"
//! ```

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::error::{LookupError, LookupResult};

/// Lookup file shipped with the binary.
const EMBEDDED_LOOKUPS: &str = include_str!("../../lookups/default.toml");

// =============================================================================
// File format
// =============================================================================

#[derive(Debug, Deserialize)]
struct LookupFile {
    version: String,
    #[serde(default)]
    defaults: Defaults,
    #[serde(default)]
    companies: HashMap<String, Company>,
    #[serde(default)]
    classifications: HashMap<String, String>,
    #[serde(default)]
    functions: HashMap<String, String>,
    situations: SituationSection,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct Defaults {
    other_classification: String,
    unknown_company_prefix: String,
    hours_worked: u32,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            other_classification: "OUT".to_string(),
            unknown_company_prefix: "0".to_string(),
            hours_worked: 8,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SituationSection {
    #[serde(default)]
    confirmed: bool,
    #[serde(default = "default_terminated")]
    terminated: u32,
    labels: HashMap<String, String>,
}

fn default_terminated() -> u32 {
    8
}

// =============================================================================
// Tables
// =============================================================================

/// Company reference data.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Company {
    pub tax_id: String,
    /// Single-character matricula prefix.
    pub prefix: String,
}

/// Loaded lookup tables.
///
/// Classification and executing-function are two independent maps; neither
/// is derived from the other.
#[derive(Debug, Clone)]
pub struct LookupTables {
    version: String,
    companies: HashMap<String, Company>,
    classifications: HashMap<String, String>,
    functions: HashMap<String, String>,
    situations: BTreeMap<u32, String>,
    situations_confirmed: bool,
    terminated_code: u32,
    other_classification: String,
    unknown_company_prefix: String,
    hours_worked: u32,
}

impl LookupTables {
    /// The tables embedded in the binary.
    pub fn embedded() -> LookupResult<Self> {
        Self::from_toml_str(EMBEDDED_LOOKUPS)
    }

    /// Load tables from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> LookupResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Load from `path` when given, otherwise use the embedded tables.
    pub fn load_or_embedded(path: Option<&Path>) -> LookupResult<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Self::embedded(),
        }
    }

    /// Parse tables from TOML text.
    pub fn from_toml_str(content: &str) -> LookupResult<Self> {
        let file: LookupFile = toml::from_str(content)?;

        for (name, company) in &file.companies {
            if company.prefix.chars().count() != 1 {
                return Err(LookupError::InvalidPrefix {
                    company: name.clone(),
                    prefix: company.prefix.clone(),
                });
            }
        }

        let mut situations = BTreeMap::new();
        for (code, label) in file.situations.labels {
            let parsed: u32 = code
                .trim()
                .parse()
                .map_err(|_| LookupError::InvalidSituationCode(code.clone()))?;
            situations.insert(parsed, label);
        }

        Ok(Self {
            version: file.version,
            companies: file.companies,
            classifications: file.classifications,
            functions: file.functions,
            situations,
            situations_confirmed: file.situations.confirmed,
            terminated_code: file.situations.terminated,
            other_classification: file.defaults.other_classification,
            unknown_company_prefix: file.defaults.unknown_company_prefix,
            hours_worked: file.defaults.hours_worked,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Company entry by exact (uppercased) header name.
    pub fn company(&self, name: &str) -> Option<&Company> {
        self.companies.get(name)
    }

    /// Classification code for a normalized job title.
    pub fn classification(&self, normalized_title: &str) -> Option<&str> {
        self.classifications.get(normalized_title).map(String::as_str)
    }

    /// Executing-function for a normalized job title.
    pub fn executing_function(&self, normalized_title: &str) -> Option<&str> {
        self.functions.get(normalized_title).map(String::as_str)
    }

    /// Human label for a situation code.
    pub fn situation_label(&self, code: u32) -> Option<&str> {
        self.situations.get(&code).map(String::as_str)
    }

    pub fn is_terminated(&self, code: u32) -> bool {
        code == self.terminated_code
    }

    /// Whether the deploying organization confirmed the situation labels.
    pub fn situations_confirmed(&self) -> bool {
        self.situations_confirmed
    }

    pub fn other_classification(&self) -> &str {
        &self.other_classification
    }

    pub fn unknown_company_prefix(&self) -> &str {
        &self.unknown_company_prefix
    }

    pub fn hours_worked(&self) -> u32 {
        self.hours_worked
    }

    /// Entry counts: (companies, classifications, functions, situations).
    pub fn counts(&self) -> (usize, usize, usize, usize) {
        (
            self.companies.len(),
            self.classifications.len(),
            self.functions.len(),
            self.situations.len(),
        )
    }

    /// Situation table in code order.
    pub fn situations(&self) -> impl Iterator<Item = (u32, &str)> {
        self.situations.iter().map(|(code, label)| (*code, label.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
version = "test"

[companies."ACME FLORESTAL LTDA"]
tax_id = "11.111.111/0001-11"
prefix = "7"

[classifications]
"MOTORISTA" = "MCM"

[functions]
"AJUDANTE GERAL" = "AJUDANTE"

[situations]
labels = { "1" = "Trabalhando", "8" = "Demitido" }
"#;

    #[test]
    fn test_embedded_tables_load() {
        let tables = LookupTables::embedded().unwrap();
        assert_eq!(tables.classification("MOTORISTA CAMINHAO"), Some("MCM"));
        assert_eq!(tables.executing_function("OPERADOR DE MUNCK"), Some("OPERADOR"));
        assert_eq!(tables.company("LARSIL FLORESTAL LTDA").unwrap().prefix, "1");
        assert_eq!(tables.situation_label(1), Some("Trabalhando"));
        assert!(tables.is_terminated(8));
        assert!(!tables.situations_confirmed());
    }

    #[test]
    fn test_defaults_applied() {
        let tables = LookupTables::from_toml_str(MINIMAL).unwrap();
        assert_eq!(tables.other_classification(), "OUT");
        assert_eq!(tables.unknown_company_prefix(), "0");
        assert_eq!(tables.hours_worked(), 8);
        assert!(tables.is_terminated(8));
    }

    #[test]
    fn test_tables_are_independent() {
        let tables = LookupTables::from_toml_str(MINIMAL).unwrap();
        // Classified but no function entry, and the reverse.
        assert_eq!(tables.classification("MOTORISTA"), Some("MCM"));
        assert_eq!(tables.executing_function("MOTORISTA"), None);
        assert_eq!(tables.classification("AJUDANTE GERAL"), None);
        assert_eq!(tables.executing_function("AJUDANTE GERAL"), Some("AJUDANTE"));
    }

    #[test]
    fn test_invalid_situation_code_rejected() {
        let content = MINIMAL.replace("\"8\" = \"Demitido\"", "\"oito\" = \"Demitido\"");
        let err = LookupTables::from_toml_str(&content).unwrap_err();
        assert!(matches!(err, LookupError::InvalidSituationCode(code) if code == "oito"));
    }

    #[test]
    fn test_multi_char_prefix_rejected() {
        let content = MINIMAL.replace("prefix = \"7\"", "prefix = \"77\"");
        assert!(matches!(
            LookupTables::from_toml_str(&content),
            Err(LookupError::InvalidPrefix { .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lookups.toml");
        std::fs::write(&path, MINIMAL).unwrap();

        let tables = LookupTables::load_or_embedded(Some(&path)).unwrap();
        assert_eq!(tables.version(), "test");
        assert_eq!(tables.counts(), (1, 1, 1, 2));
    }
}
