//! # Bill of Materials
//!
//! The version manifest bundled with this operator build: the platform
//! version plus the Module version of every component.
//!
//! ```yaml
//! version: 1.4.0
//! components:
//!   - name: ingress
//!     version: 1.4.0
//! ```

use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BomError {
    #[error("failed to read BOM {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse BOM: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid version '{version}': {source}")]
    InvalidVersion {
        version: String,
        #[source]
        source: semver::Error,
    },
}

/// Module-version lookup keyed by component name
pub trait VersionCatalog: Send + Sync + Debug {
    fn module_version(&self, component: &str) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BomComponent {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Bom {
    pub version: String,
    #[serde(default)]
    pub components: Vec<BomComponent>,
}

impl Bom {
    pub fn from_path(path: &Path) -> Result<Self, BomError> {
        let raw = std::fs::read_to_string(path).map_err(|source| BomError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, BomError> {
        let bom: Bom = serde_yaml::from_str(raw)?;
        parse_version(&bom.version)?;
        Ok(bom)
    }
}

impl VersionCatalog for Bom {
    fn module_version(&self, component: &str) -> Option<String> {
        self.components
            .iter()
            .find(|c| c.name == component)
            .map(|c| c.version.clone())
    }
}

/// Lenient semver parse: accepts a leading `v` and pads `1` / `1.2` to three parts
pub fn parse_version(raw: &str) -> Result<semver::Version, BomError> {
    let trimmed = raw.trim().trim_start_matches('v');
    let (core, rest) = match trimmed.find(['-', '+']) {
        Some(idx) => trimmed.split_at(idx),
        None => (trimmed, ""),
    };
    let padded = match core.split('.').count() {
        1 => format!("{core}.0.0{rest}"),
        2 => format!("{core}.0{rest}"),
        _ => trimmed.to_string(),
    };
    semver::Version::parse(&padded).map_err(|source| BomError::InvalidVersion {
        version: raw.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version_pads_short_forms() {
        assert_eq!(parse_version("1.0").unwrap(), semver::Version::new(1, 0, 0));
        assert_eq!(parse_version("v2").unwrap(), semver::Version::new(2, 0, 0));
        assert_eq!(
            parse_version("1.4.0-rc.1").unwrap().pre.as_str(),
            "rc.1"
        );
        assert!(parse_version("banana").is_err());
    }

    #[test]
    fn test_catalog_lookup() {
        let bom = Bom::from_yaml(
            "version: \"1.0\"\ncomponents:\n  - name: alpha\n    version: \"1.0\"\n",
        )
        .unwrap();
        assert_eq!(bom.module_version("alpha").as_deref(), Some("1.0"));
        assert!(bom.module_version("beta").is_none());
    }
}
