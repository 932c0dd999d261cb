//! # Overrides
//!
//! Component configuration arrives in two shapes: the current `overrides`
//! list (one entry may carry values and references side by side) and the
//! older tagged `valueOverrides` list. Both are converted here into a single
//! ordered list of [`OverrideSource`] so the rest of the operator never has
//! to care which shape the user wrote.

use serde::{Deserialize, Serialize};

/// Reference to one key of a Secret or ConfigMap in the Stack's namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KeyRef {
    pub name: String,
    pub key: String,
    /// A missing optional source is skipped instead of failing the component
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional: Option<bool>,
}

impl KeyRef {
    #[must_use]
    pub fn is_optional(&self) -> bool {
        self.optional.unwrap_or(false)
    }
}

/// Current override entry
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Overrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "crate::crd::preserve_unknown_fields")]
    pub values: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<KeyRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_ref: Option<KeyRef>,
}

/// Kind tag of a [`LegacyOverride`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum LegacyOverrideKind {
    Values,
    Secret,
    ConfigMap,
}

/// Older override entry: one source per entry, selected by `kind`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LegacyOverride {
    pub kind: LegacyOverrideKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "crate::crd::preserve_unknown_fields")]
    pub values: Option<serde_json::Value>,
}

/// One source of component values, in declaration order
#[derive(Debug, Clone, PartialEq)]
pub enum OverrideSource {
    Values(serde_json::Value),
    Secret(KeyRef),
    ConfigMap(KeyRef),
}

impl OverrideSource {
    /// Name of the referenced user resource, if any
    #[must_use]
    pub fn referenced_name(&self) -> Option<&str> {
        match self {
            OverrideSource::Values(_) => None,
            OverrideSource::Secret(r) | OverrideSource::ConfigMap(r) => Some(&r.name),
        }
    }
}

/// Error for legacy entries missing the fields their kind requires
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("legacy override of kind {kind:?} is missing '{field}'")]
pub struct LegacyOverrideError {
    pub kind: LegacyOverrideKind,
    pub field: &'static str,
}

impl Overrides {
    /// Sources carried by this entry: values first, then the Secret, then the ConfigMap
    #[must_use]
    pub fn sources(&self) -> Vec<OverrideSource> {
        let mut out = Vec::new();
        if let Some(values) = &self.values {
            out.push(OverrideSource::Values(values.clone()));
        }
        if let Some(secret) = &self.secret_ref {
            out.push(OverrideSource::Secret(secret.clone()));
        }
        if let Some(cm) = &self.config_map_ref {
            out.push(OverrideSource::ConfigMap(cm.clone()));
        }
        out
    }
}

impl TryFrom<&LegacyOverride> for OverrideSource {
    type Error = LegacyOverrideError;

    fn try_from(entry: &LegacyOverride) -> Result<Self, Self::Error> {
        let missing = |field| LegacyOverrideError {
            kind: entry.kind,
            field,
        };
        match entry.kind {
            LegacyOverrideKind::Values => entry
                .values
                .clone()
                .map(OverrideSource::Values)
                .ok_or_else(|| missing("values")),
            LegacyOverrideKind::Secret | LegacyOverrideKind::ConfigMap => {
                let key_ref = KeyRef {
                    name: entry.name.clone().ok_or_else(|| missing("name"))?,
                    key: entry.key.clone().ok_or_else(|| missing("key"))?,
                    optional: entry.optional,
                };
                Ok(if entry.kind == LegacyOverrideKind::Secret {
                    OverrideSource::Secret(key_ref)
                } else {
                    OverrideSource::ConfigMap(key_ref)
                })
            }
        }
    }
}

/// Flatten current-shape entries into sources
#[must_use]
pub fn from_current(entries: &[Overrides]) -> Vec<OverrideSource> {
    entries.iter().flat_map(Overrides::sources).collect()
}

/// Convert legacy entries into sources, failing on the first malformed entry
pub fn from_legacy(entries: &[LegacyOverride]) -> Result<Vec<OverrideSource>, LegacyOverrideError> {
    entries.iter().map(OverrideSource::try_from).collect()
}
