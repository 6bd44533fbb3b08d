//! Data classification library: binds matchers to rules and classifies the
//! fields of a newly created job.
//!
//! Library format (YAML):
//!
//! ```yaml
//! classes:
//!   - name: EMAIL
//!     rule: MaskEmail
//!     name_pattern: ".*email.*"        # optional column-name matcher
//!     matchers:
//!       - kind: PATTERN
//!         pattern: "[\\w.]+@[\\w.]+"
//!       - kind: FILE
//!         path: /dict/known_emails.set
//!   - name: CITY
//!     rule: Cities
//!     matchers:
//!       - kind: FILE
//!         path: /dict/cities.set
//! rules: []   # optional inline rules, merged over the external library
//! ```
//!
//! Each matcher sub-element yields one classification entry; entries keep
//! their declaration order, and classification is first-match-wins in that
//! order with value matching taking priority over name matching.

use crate::event::value_text;
use crate::job::Field;
use crate::matcher::Matcher;
use crate::rules::{Rule, RuleLibrary};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One classification entry: a data class bound to a rule, with up to two
/// matchers. An entry with neither matcher is invalid and discarded at load.
#[derive(Debug, Clone)]
pub struct ClassEntry {
    /// Name of the owning data class
    pub owner: String,
    /// Matcher over the column name
    pub name_matcher: Option<Matcher>,
    /// Matcher over the column value
    pub data_matcher: Option<Matcher>,
    /// Rule applied when the entry wins
    pub rule: Rule,
}

impl ClassEntry {
    /// Whether this entry accepts the given field name / value pair.
    /// Value matching takes priority; the name matcher is consulted only
    /// when no data matcher is present or it rejects.
    fn accepts(&self, field_name: &str, value: &str) -> bool {
        if let Some(m) = &self.data_matcher {
            if m.is_match(value) {
                return true;
            }
        }
        if let Some(m) = &self.name_matcher {
            return m.is_match(field_name);
        }
        false
    }
}

/// Ordered list of classification entries
#[derive(Debug, Clone, Default)]
pub struct ClassLibrary {
    entries: Vec<ClassEntry>,
}

#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "UPPERCASE")]
enum MatcherDef {
    /// Regex over column values
    Pattern { pattern: String },
    /// Dictionary file membership
    File { path: PathBuf },
}

#[derive(Deserialize)]
struct ClassDef {
    name: String,
    rule: String,
    #[serde(default)]
    name_pattern: Option<String>,
    #[serde(default)]
    matchers: Vec<MatcherDef>,
}

#[derive(Deserialize)]
struct ClassFile {
    #[serde(default)]
    classes: Vec<ClassDef>,
    /// Inline rule definitions, merged over the external rule library
    #[serde(default)]
    rules: serde_yaml::Value,
}

impl ClassLibrary {
    /// An empty library; classification becomes a no-op
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load a data-class library bound to a rule library. `None` or a
    /// whole-resource parse failure degrades to an empty library.
    pub fn load(path: Option<&Path>, rules: &RuleLibrary) -> Self {
        let Some(path) = path else {
            warn!("Data class library path not set; fields will pass through unclassified");
            return Self::empty();
        };
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Could not read data class library '{}': {}", path.display(), e);
                return Self::empty();
            }
        };
        match Self::parse(&content, rules) {
            Ok(lib) => lib,
            Err(e) => {
                warn!("Could not parse data class library '{}': {}", path.display(), e);
                Self::empty()
            }
        }
    }

    /// Parse a class library from YAML text against a rule library
    pub fn parse(content: &str, rules: &RuleLibrary) -> Result<Self, serde_yaml::Error> {
        let file: ClassFile = serde_yaml::from_str(content)?;

        // Inline rules extend/override the external library.
        let inline = if file.rules.is_null() {
            RuleLibrary::empty()
        } else {
            let text = serde_yaml::to_string(&serde_yaml::Value::Mapping(
                [(serde_yaml::Value::from("rules"), file.rules)].into_iter().collect(),
            ))?;
            RuleLibrary::parse(&text).unwrap_or_else(|e| {
                warn!("Could not parse inline rules: {}", e);
                RuleLibrary::empty()
            })
        };

        let mut entries = Vec::new();
        for class in file.classes {
            let Some(rule) = inline.get(&class.rule).or_else(|| rules.get(&class.rule)) else {
                warn!(
                    "Data class '{}' references unknown rule '{}'; skipping",
                    class.name, class.rule
                );
                continue;
            };

            let name_matcher = match class.name_pattern.as_deref() {
                Some(pattern) => match Matcher::name_regex(pattern) {
                    Ok(m) => Some(m),
                    Err(e) => {
                        warn!(
                            "Invalid name pattern for data class '{}': {}",
                            class.name, e
                        );
                        None
                    }
                },
                None => None,
            };

            if class.matchers.is_empty() {
                match &name_matcher {
                    Some(_) => entries.push(ClassEntry {
                        owner: class.name.clone(),
                        name_matcher: name_matcher.clone(),
                        data_matcher: None,
                        rule: rule.clone(),
                    }),
                    None => warn!(
                        "Data class '{}' has neither a name nor a data matcher; discarding",
                        class.name
                    ),
                }
                continue;
            }

            for def in class.matchers {
                let data_matcher = match def {
                    MatcherDef::Pattern { pattern } => match Matcher::value_regex(&pattern) {
                        Ok(m) => m,
                        Err(e) => {
                            warn!(
                                "Invalid value pattern for data class '{}': {}",
                                class.name, e
                            );
                            continue;
                        }
                    },
                    MatcherDef::File { path } => match Matcher::set_lookup(&path) {
                        Ok(m) => m,
                        Err(e) => {
                            warn!("Set file '{}' does not exist: {}", path.display(), e);
                            continue;
                        }
                    },
                };
                entries.push(ClassEntry {
                    owner: class.name.clone(),
                    name_matcher: name_matcher.clone(),
                    data_matcher: Some(data_matcher),
                    rule: rule.clone(),
                });
            }
        }

        Ok(Self { entries })
    }

    /// Classify a new job's fields against the row's values, in column
    /// order. The first entry (declaration order) whose data matcher
    /// accepts the value - or, failing that, whose name matcher accepts
    /// the field name - wins; null values are never classified.
    pub fn classify(&self, fields: &mut [Field], row: &Map<String, Value>) {
        for (field, (_, value)) in fields.iter_mut().zip(row.iter()) {
            if value.is_null() {
                continue;
            }
            let text = value_text(value);
            for entry in &self.entries {
                if entry.accepts(&field.name, &text) {
                    field.classified = true;
                    field.expression = Some(entry.rule.template.clone());
                    field.rule_kind = Some(entry.rule.kind);
                    debug!(
                        "Field '{}' classified as '{}' via rule '{}'",
                        field.name, entry.owner, entry.rule.name
                    );
                    break;
                }
            }
        }
    }

    /// Entries in declaration order
    pub fn entries(&self) -> &[ClassEntry] {
        &self.entries
    }

    /// Whether the library has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
