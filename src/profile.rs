//! # Profiles
//!
//! Effective state = the selected profile's defaults with the Stack's own spec
//! merged on top. The resolver sits behind [`EffectiveStateResolver`] so the
//! reconciler does not depend on how profiles are stored.
//!
//! ```yaml
//! default: dev
//! profiles:
//!   dev:
//!     components:
//!       alpha: { enabled: true }
//! ```

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::crd::{Stack, StackSpec};
use crate::merge::deep_merge;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("failed to read profiles {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse profiles: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("unknown profile '{0}'")]
    UnknownProfile(String),
    #[error("failed to merge profile into stack spec: {0}")]
    Merge(#[from] serde_json::Error),
}

/// Computes the fully-resolved desired state of a Stack
pub trait EffectiveStateResolver: Send + Sync + Debug {
    /// The returned Stack carries the input's metadata and status unchanged
    fn resolve(&self, actual: &Stack) -> Result<Stack, ProfileError>;
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileResolver {
    #[serde(default)]
    default: Option<String>,
    #[serde(default)]
    profiles: BTreeMap<String, StackSpec>,
}

impl ProfileResolver {
    /// A resolver with no profiles: the effective state is the Stack itself
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ProfileError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Missing file means no profiles
    pub fn load(path: &Path) -> Result<Self, ProfileError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::from_yaml(&raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::empty()),
            Err(source) => Err(ProfileError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    fn profile_for(&self, stack: &Stack) -> Result<Option<&StackSpec>, ProfileError> {
        let Some(name) = stack.spec.profile.as_ref().or(self.default.as_ref()) else {
            return Ok(None);
        };
        self.profiles
            .get(name)
            .map(Some)
            .ok_or_else(|| ProfileError::UnknownProfile(name.clone()))
    }
}

impl EffectiveStateResolver for ProfileResolver {
    fn resolve(&self, actual: &Stack) -> Result<Stack, ProfileError> {
        let Some(profile) = self.profile_for(actual)? else {
            return Ok(actual.clone());
        };
        let mut merged = serde_json::to_value(profile)?;
        deep_merge(&mut merged, serde_json::to_value(&actual.spec)?);

        let mut effective = actual.clone();
        effective.spec = serde_json::from_value(merged)?;
        Ok(effective)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ComponentSpec;

    const PROFILES: &str = r"
default: dev
profiles:
  dev:
    components:
      alpha:
        enabled: true
      beta:
        enabled: true
        monitorChanges: false
  prod:
    components:
      alpha:
        enabled: true
";

    #[test]
    fn test_stack_settings_win_over_profile() {
        let resolver = ProfileResolver::from_yaml(PROFILES).unwrap();
        let mut spec = StackSpec::default();
        spec.components.insert(
            "beta".into(),
            ComponentSpec {
                enabled: Some(false),
                ..ComponentSpec::default()
            },
        );
        let effective = resolver.resolve(&Stack::new("s", spec)).unwrap();

        assert_eq!(effective.spec.components["alpha"].enabled, Some(true));
        assert_eq!(effective.spec.components["beta"].enabled, Some(false));
        assert_eq!(effective.spec.components["beta"].monitor_changes, Some(false));
    }

    #[test]
    fn test_named_profile_and_unknown_profile() {
        let resolver = ProfileResolver::from_yaml(PROFILES).unwrap();
        let prod = Stack::new(
            "s",
            StackSpec {
                profile: Some("prod".into()),
                ..StackSpec::default()
            },
        );
        let effective = resolver.resolve(&prod).unwrap();
        assert!(!effective.spec.components.contains_key("beta"));

        let bogus = Stack::new(
            "s",
            StackSpec {
                profile: Some("nope".into()),
                ..StackSpec::default()
            },
        );
        assert!(matches!(
            resolver.resolve(&bogus),
            Err(ProfileError::UnknownProfile(_))
        ));
    }

    #[test]
    fn test_empty_resolver_is_identity() {
        let stack = Stack::new("s", StackSpec::default());
        let effective = ProfileResolver::empty().resolve(&stack).unwrap();
        assert_eq!(effective.spec.components, stack.spec.components);
    }
}
