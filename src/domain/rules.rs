use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::domain::naming::{clean_label, normalize_name};

/// Per-column conflict-resolution policy applied when an incoming row matches
/// an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PolicyRule {
    /// Never touch the stored value.
    #[default]
    Ignore,
    /// Replace with the incoming value whenever it is non-empty and different.
    Overwrite,
    /// Replace only when the incoming value is a strictly later date.
    UpdateIfNewer,
    /// Write only into an empty cell.
    FillIfEmpty,
    /// Same behaviour as `FillIfEmpty`; kept as a separate name because both
    /// labels exist in persisted rule tables.
    PreserveIfNotEmpty,
    /// Concatenate a different incoming value after the stored one.
    AppendIfDifferent,
}

impl PolicyRule {
    pub const ALL: [PolicyRule; 6] = [
        PolicyRule::Ignore,
        PolicyRule::Overwrite,
        PolicyRule::UpdateIfNewer,
        PolicyRule::FillIfEmpty,
        PolicyRule::PreserveIfNotEmpty,
        PolicyRule::AppendIfDifferent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyRule::Ignore => "ignore",
            PolicyRule::Overwrite => "overwrite",
            PolicyRule::UpdateIfNewer => "update_if_newer",
            PolicyRule::FillIfEmpty => "fill_if_empty",
            PolicyRule::PreserveIfNotEmpty => "preserve_if_not_empty",
            PolicyRule::AppendIfDifferent => "append_if_different",
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, PolicyRule::Ignore)
    }
}

impl std::fmt::Display for PolicyRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown column rule `{0}`")]
pub struct UnknownRule(pub String);

impl FromStr for PolicyRule {
    type Err = UnknownRule;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            // `match` marked key-only rows in older rule tables
            "ignore" | "match" => Ok(PolicyRule::Ignore),
            "overwrite" => Ok(PolicyRule::Overwrite),
            "update_if_newer" => Ok(PolicyRule::UpdateIfNewer),
            "fill_if_empty" => Ok(PolicyRule::FillIfEmpty),
            "preserve_if_not_empty" => Ok(PolicyRule::PreserveIfNotEmpty),
            "append_if_different" => Ok(PolicyRule::AppendIfDifferent),
            other => Err(UnknownRule(other.to_string())),
        }
    }
}

/// How multiple unique-key columns combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyMode {
    /// All key columns form one compound key.
    #[default]
    Composite,
    /// Key columns are tried one at a time, by priority.
    Fallback,
}

impl KeyMode {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "fallback" => KeyMode::Fallback,
            _ => KeyMode::Composite,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyMode::Composite => "composite",
            KeyMode::Fallback => "fallback",
        }
    }
}

/// Priority given to key rows without an explicit one.
pub const LOWEST_KEY_PRIORITY: i64 = 999;

/// One unique-key column, identified by its normalized name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyColumn {
    pub name: String,
    pub priority: i64,
}

/// Rule attached to one column, with the labels it was configured under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleEntry {
    pub rule: PolicyRule,
    pub original: String,
    pub label: String,
}

/// Canonical rule configuration consumed by the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RuleSet {
    /// Keyed by normalized column name.
    pub policies: BTreeMap<String, RuleEntry>,
    /// Ordered by ascending priority (highest priority first).
    pub keys: Vec<KeyColumn>,
    pub key_mode: KeyMode,
}

impl RuleSet {
    pub fn policy(&self, normalized: &str) -> PolicyRule {
        self.policies
            .get(normalized)
            .map(|e| e.rule)
            .unwrap_or_default()
    }

    pub fn key_names(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(|k| k.name.as_str())
    }

    pub fn has_keys(&self) -> bool {
        !self.keys.is_empty()
    }

    /// Fold a rule map of either historical shape into the canonical set.
    /// Keys are carried separately since neither shape records them.
    pub fn from_source(source: RuleSource, keys: Vec<KeyColumn>, key_mode: KeyMode) -> Self {
        let policies = match source {
            RuleSource::Flat(map) => map
                .into_iter()
                .map(|(col, rule)| {
                    (
                        normalize_name(&col),
                        RuleEntry {
                            rule,
                            label: clean_label(&col),
                            original: col,
                        },
                    )
                })
                .collect(),
            RuleSource::Enriched(map) => map
                .into_iter()
                .map(|(norm, entry)| (normalize_name(&norm), entry))
                .collect(),
        };
        let mut keys = keys;
        keys.sort_by_key(|k| k.priority);
        RuleSet {
            policies,
            keys,
            key_mode,
        }
    }
}

/// The two rule-map shapes found in persisted configuration: a flat
/// `column → rule` map, and the enriched map that also carries the original
/// and display labels. Normalized immediately by [`RuleSet::from_source`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RuleSource {
    Enriched(BTreeMap<String, RuleEntry>),
    Flat(BTreeMap<String, PolicyRule>),
}
