//! Rule library: named, typed transformation rule templates.
//!
//! Two historical YAML layouts are accepted and folded into one canonical
//! in-memory form:
//!
//! - a flat list of named rules:
//!
//! ```yaml
//! rules:
//!   - name: MaskEmail
//!     kind: EXPRESSION
//!     value: "enc_fp_aes256_alphanum(${FIELDNAME})"
//! ```
//!
//! - a nested, versioned layout with per-rule metadata:
//!
//! ```yaml
//! version: 2
//! library:
//!   name: corp-rules
//!   rules:
//!     - name: Cities
//!       metadata: {revision: 4}
//!       properties:
//!         - kind: SET
//!           value: "\"/dict/cities.set\" SELECT=ANY"
//! ```
//!
//! A parse failure of the whole resource degrades to an empty library with
//! a warning; the caller proceeds with unclassified pass-through fields.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

/// Placeholder token substituted with the field name at script-compile time
pub const FIELD_NAME_TOKEN: &str = "${FIELDNAME}";

/// Selector qualifier trailing raw SET definitions
const SET_SELECTOR_QUALIFIER: &str = " SELECT=ANY";

/// Rule kind: how the template is applied at script compilation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RuleKind {
    /// Template with a `${FIELDNAME}` placeholder, rendered as an
    /// assignment expression
    Expression,
    /// Dictionary resource reference, never placeholder-substituted
    Set,
}

/// A named, typed transformation rule template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    /// Rule name, unique within one library snapshot
    pub name: String,
    /// Rule kind
    pub kind: RuleKind,
    /// Raw template (Expression) or dictionary reference (Set)
    pub template: String,
}

/// Loaded rule library: name → rule, later duplicates overwrite earlier ones.
#[derive(Debug, Clone, Default)]
pub struct RuleLibrary {
    rules: HashMap<String, Rule>,
}

#[derive(Deserialize)]
struct RuleDef {
    name: String,
    kind: RuleKind,
    value: String,
}

#[derive(Deserialize)]
struct RuleProperty {
    kind: RuleKind,
    value: String,
}

#[derive(Deserialize)]
struct VersionedRuleDef {
    name: String,
    #[serde(default)]
    #[allow(dead_code)] // carried by the format, not consumed
    metadata: Option<serde_yaml::Value>,
    #[serde(default)]
    properties: Vec<RuleProperty>,
}

#[derive(Deserialize)]
struct VersionedLibrary {
    #[serde(default)]
    #[allow(dead_code)]
    name: Option<String>,
    #[serde(default)]
    rules: Vec<VersionedRuleDef>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RuleFile {
    Versioned {
        #[allow(dead_code)]
        version: u32,
        library: VersionedLibrary,
    },
    Flat {
        rules: Vec<RuleDef>,
    },
}

impl RuleLibrary {
    /// An empty library; every field stays unclassified
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load a rule library. `None` or any parse/read failure degrades to an
    /// empty library with a warning - never fatal.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            warn!("Rule library path not set; fields will pass through unclassified");
            return Self::empty();
        };
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Could not read rule library '{}': {}", path.display(), e);
                return Self::empty();
            }
        };
        match Self::parse(&content) {
            Ok(lib) => lib,
            Err(e) => {
                warn!("Could not parse rule library '{}': {}", path.display(), e);
                Self::empty()
            }
        }
    }

    /// Parse rule definitions from YAML text (either layout)
    pub fn parse(content: &str) -> Result<Self, serde_yaml::Error> {
        let file: RuleFile = serde_yaml::from_str(content)?;
        let mut rules = HashMap::new();

        let defs: Vec<(String, RuleKind, String)> = match file {
            RuleFile::Flat { rules } => rules
                .into_iter()
                .map(|d| (d.name, d.kind, d.value))
                .collect(),
            RuleFile::Versioned { library, .. } => library
                .rules
                .into_iter()
                .flat_map(|r| {
                    let name = r.name;
                    r.properties
                        .into_iter()
                        .map(move |p| (name.clone(), p.kind, p.value))
                })
                .collect(),
        };

        for (name, kind, value) in defs {
            let template = match kind {
                RuleKind::Set => clean_set_template(&value),
                RuleKind::Expression => value,
            };
            rules.insert(name.clone(), Rule { name, kind, template });
        }

        Ok(Self { rules })
    }

    /// Look up a rule by name
    pub fn get(&self, name: &str) -> Option<&Rule> {
        self.rules.get(name)
    }

    /// Number of loaded rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the library is empty
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Strip literal quoting artifacts and the trailing selector qualifier from
/// a raw SET definition, leaving the bare dictionary reference.
fn clean_set_template(raw: &str) -> String {
    raw.replace("&quot;", "")
        .replace('"', "")
        .replace(SET_SELECTOR_QUALIFIER, "")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_layout() {
        let yaml = r#"
rules:
  - name: MaskEmail
    kind: EXPRESSION
    value: "mask(${FIELDNAME})"
  - name: Cities
    kind: SET
    value: "\"/dict/cities.set\" SELECT=ANY"
"#;
        let lib = RuleLibrary::parse(yaml).unwrap();
        assert_eq!(lib.len(), 2);

        let rule = lib.get("MaskEmail").unwrap();
        assert_eq!(rule.kind, RuleKind::Expression);
        assert_eq!(rule.template, "mask(${FIELDNAME})");

        let rule = lib.get("Cities").unwrap();
        assert_eq!(rule.kind, RuleKind::Set);
        // Quoting artifacts and selector qualifier stripped
        assert_eq!(rule.template, "/dict/cities.set");
    }

    #[test]
    fn test_versioned_layout() {
        let yaml = r#"
version: 2
library:
  name: corp
  rules:
    - name: Redact
      metadata:
        revision: 3
      properties:
        - kind: EXPRESSION
          value: "redact(${FIELDNAME})"
"#;
        let lib = RuleLibrary::parse(yaml).unwrap();
        assert_eq!(lib.get("Redact").unwrap().template, "redact(${FIELDNAME})");
    }

    #[test]
    fn test_duplicate_overwrites() {
        let yaml = r#"
rules:
  - name: R
    kind: EXPRESSION
    value: "first(${FIELDNAME})"
  - name: R
    kind: EXPRESSION
    value: "second(${FIELDNAME})"
"#;
        let lib = RuleLibrary::parse(yaml).unwrap();
        assert_eq!(lib.len(), 1);
        assert_eq!(lib.get("R").unwrap().template, "second(${FIELDNAME})");
    }

    #[test]
    fn test_html_entity_quotes_stripped() {
        let yaml = r#"
rules:
  - name: S
    kind: SET
    value: "&quot;/dict/words.set&quot; SELECT=ANY"
"#;
        let lib = RuleLibrary::parse(yaml).unwrap();
        assert_eq!(lib.get("S").unwrap().template, "/dict/words.set");
    }

    #[test]
    fn test_parse_failure_degrades_to_empty() {
        let lib = RuleLibrary::load(Some(Path::new("/nonexistent/rules.yaml")));
        assert!(lib.is_empty());

        let lib = RuleLibrary::load(None);
        assert!(lib.is_empty());

        assert!(RuleLibrary::parse(": not valid yaml [").is_err());
    }
}
