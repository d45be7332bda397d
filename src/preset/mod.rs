//! Preset catalog and system-instruction resolution.
//!
//! A catalog maps preset names to instruction text. `BasePrompt` is the
//! base instruction every resolution starts from; any other selection is
//! appended to it after a single space. `Custom` is a reserved name whose
//! text comes from the caller instead of the catalog.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Name of the required base instruction.
pub const BASE_PRESET: &str = "BasePrompt";

/// Reserved name for caller-supplied instruction text.
pub const CUSTOM_PRESET: &str = "Custom";

const BUILTIN_CATALOG: &str = include_str!("../../presets/presets.json");

#[derive(Debug, Error)]
pub enum PresetError {
    #[error("failed to read preset catalog {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("preset catalog must be a JSON object of strings: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("preset catalog has no `{BASE_PRESET}` entry")]
    MissingBase,

    #[error("`{CUSTOM_PRESET}` is reserved and cannot be defined in the catalog")]
    ReservedName,

    #[error("unknown preset `{0}`")]
    Unknown(String),

    #[error("the `{CUSTOM_PRESET}` preset needs a custom instruction")]
    MissingCustomInstruction,
}

/// What the user picked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresetSelection {
    /// The base instruction alone.
    Base,
    /// A catalog entry other than the base.
    Named(String),
    /// Caller-supplied instruction text.
    Custom(String),
}

impl PresetSelection {
    /// Interprets a preset name, taking `custom` text for the `Custom` sentinel.
    ///
    /// Whether a named preset exists is checked at resolution time.
    pub fn parse(name: &str, custom: Option<&str>) -> Result<Self, PresetError> {
        match name {
            BASE_PRESET => Ok(Self::Base),
            CUSTOM_PRESET => custom
                .map(|text| Self::Custom(text.to_owned()))
                .ok_or(PresetError::MissingCustomInstruction),
            other => Ok(Self::Named(other.to_owned())),
        }
    }
}

/// Immutable mapping from preset name to instruction text, loaded once.
///
/// # Examples
///
/// ```
/// use prompt_enhancer::preset::{PresetCatalog, PresetSelection};
///
/// let catalog = PresetCatalog::from_json(
///     r#"{"BasePrompt": "Improve this prompt.", "Anime": "Use anime style."}"#,
/// ).unwrap();
///
/// let named = PresetSelection::Named("Anime".into());
/// assert_eq!(catalog.resolve(&named).unwrap(), "Improve this prompt. Use anime style.");
/// assert_eq!(catalog.resolve(&PresetSelection::Base).unwrap(), "Improve this prompt.");
/// ```
#[derive(Debug, Clone)]
pub struct PresetCatalog {
    base: String,
    presets: BTreeMap<String, String>,
}

impl PresetCatalog {
    /// Parses a catalog from a JSON object of `name: instruction` pairs.
    pub fn from_json(json: &str) -> Result<Self, PresetError> {
        let mut presets: BTreeMap<String, String> = serde_json::from_str(json)?;
        if presets.contains_key(CUSTOM_PRESET) {
            return Err(PresetError::ReservedName);
        }
        let base = presets.remove(BASE_PRESET).ok_or(PresetError::MissingBase)?;
        Ok(Self { base, presets })
    }

    /// Reads and parses a catalog file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, PresetError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| PresetError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// The catalog compiled into the binary.
    pub fn builtin() -> Result<Self, PresetError> {
        Self::from_json(BUILTIN_CATALOG)
    }

    pub fn base_instruction(&self) -> &str {
        &self.base
    }

    /// Looks up a selectable preset. The base is not selectable by itself here.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.presets.get(name).map(String::as_str)
    }

    /// Selectable preset names in sorted order, excluding the base.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.presets.keys().map(String::as_str)
    }

    /// Number of selectable presets.
    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }

    /// Builds the final system instruction for `selection`.
    pub fn resolve(&self, selection: &PresetSelection) -> Result<String, PresetError> {
        match selection {
            PresetSelection::Base => Ok(self.base.clone()),
            PresetSelection::Named(name) => self
                .get(name)
                .map(|text| format!("{} {}", self.base, text))
                .ok_or_else(|| PresetError::Unknown(name.clone())),
            PresetSelection::Custom(text) => Ok(format!("{} {}", self.base, text)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"{
        "BasePrompt": "Rewrite the prompt.",
        "Typography": "Focus on lettering.",
        "Photography": "Focus on lenses."
    }"#;

    fn catalog() -> PresetCatalog {
        PresetCatalog::from_json(CATALOG).unwrap()
    }

    #[test]
    fn base_is_not_duplicated() {
        assert_eq!(
            catalog().resolve(&PresetSelection::Base).unwrap(),
            "Rewrite the prompt."
        );
    }

    #[test]
    fn named_preset_is_appended_with_one_space() {
        let selection = PresetSelection::parse("Typography", None).unwrap();
        assert_eq!(
            catalog().resolve(&selection).unwrap(),
            "Rewrite the prompt. Focus on lettering."
        );
    }

    #[test]
    fn custom_text_is_used_verbatim() {
        let selection = PresetSelection::parse("Custom", Some("  Use *only* nouns ")).unwrap();
        assert_eq!(
            catalog().resolve(&selection).unwrap(),
            "Rewrite the prompt.   Use *only* nouns "
        );
    }

    #[test]
    fn custom_without_text_is_rejected() {
        assert!(matches!(
            PresetSelection::parse("Custom", None),
            Err(PresetError::MissingCustomInstruction)
        ));
    }

    #[test]
    fn unknown_preset_is_rejected() {
        let selection = PresetSelection::parse("Watercolor", None).unwrap();
        assert!(matches!(
            catalog().resolve(&selection),
            Err(PresetError::Unknown(name)) if name == "Watercolor"
        ));
    }

    #[test]
    fn names_exclude_base() {
        let catalog = catalog();
        let names: Vec<_> = catalog.names().collect();
        assert_eq!(names, ["Photography", "Typography"]);
        assert_eq!(catalog.len(), 2);
        assert!(catalog.get(BASE_PRESET).is_none());
    }

    #[test]
    fn catalog_requires_base() {
        let err = PresetCatalog::from_json(r#"{"Anime": "x"}"#).unwrap_err();
        assert!(matches!(err, PresetError::MissingBase));
    }

    #[test]
    fn catalog_rejects_reserved_custom() {
        let err = PresetCatalog::from_json(r#"{"BasePrompt": "x", "Custom": "y"}"#).unwrap_err();
        assert!(matches!(err, PresetError::ReservedName));
    }

    #[test]
    fn catalog_must_be_strings() {
        let err = PresetCatalog::from_json(r#"{"BasePrompt": 3}"#).unwrap_err();
        assert!(matches!(err, PresetError::Parse(_)));
    }

    #[test]
    fn builtin_catalog_loads() {
        let catalog = PresetCatalog::builtin().unwrap();
        assert!(!catalog.base_instruction().is_empty());
        assert!(catalog.get("Typography").is_some());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = PresetCatalog::from_path("/nonexistent/presets.json").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/presets.json"));
    }
}
