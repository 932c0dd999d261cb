//! # Component Registry
//!
//! The fixed set of installable components. It is built once at startup,
//! validated, ordered so that dependencies come first, and handed to the
//! reconciler. Nothing looks components up globally.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::crd::overrides::{self, LegacyOverrideError};
use crate::crd::{OverrideSource, Stack};
use crate::store::{StoreResult, Stores};

mod descriptor;

pub use descriptor::{ComponentDescriptor, DescriptorComponent, InstalledProbe, ReadinessProbe};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read component registry {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse component registry: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("component '{0}' is declared more than once")]
    Duplicate(String),
    #[error("component '{component}' depends on unknown component '{dependency}'")]
    UnknownDependency { component: String, dependency: String },
    #[error("dependency cycle between components: {0:?}")]
    Cycle(Vec<String>),
}

/// Errors resolving a component's overrides from the Stack
#[derive(Debug, Error)]
pub enum OverridesError {
    #[error("component '{0}' sets both overrides and valueOverrides")]
    Conflicting(String),
    #[error("component '{component}': {source}")]
    Legacy {
        component: String,
        #[source]
        source: LegacyOverrideError,
    },
}

/// What a component probe may look at
#[derive(Debug, Clone, Copy)]
pub struct ComponentContext<'a> {
    pub stores: &'a Stores,
    pub stack: &'a Stack,
}

/// Capability record of one installable unit
#[async_trait]
pub trait Component: Send + Sync + Debug {
    fn name(&self) -> &str;

    /// Namespace the component (and its Module) lives in
    fn namespace(&self) -> &str;

    fn dependencies(&self) -> &[String];

    /// Whether this component is driven through a Module at all
    fn should_use_module(&self) -> bool {
        true
    }

    /// Whether this operator installs the component (and tracks its status)
    fn is_operator_install_supported(&self) -> bool {
        true
    }

    fn is_enabled(&self, effective: &Stack) -> bool;

    /// When false, an existing Module is left alone outside upgrades
    fn monitor_overrides(&self, effective: &Stack) -> bool;

    /// Secrets that must exist in the component namespace before work starts
    fn required_secrets(&self) -> &[String] {
        &[]
    }

    /// Values synthesized from the Stack spec rather than supplied by the user
    fn module_config(&self, effective: &Stack) -> Option<Value>;

    /// User overrides in declaration order, both shapes unified
    fn overrides(&self, stack: &Stack) -> Result<Vec<OverrideSource>, OverridesError> {
        component_overrides(stack, self.name())
    }

    async fn is_installed(&self, ctx: ComponentContext<'_>) -> StoreResult<bool>;

    async fn is_ready(&self, ctx: ComponentContext<'_>) -> StoreResult<bool>;
}

/// Unify the two override shapes of one component.
/// Setting both on the same component is rejected.
pub fn component_overrides(stack: &Stack, name: &str) -> Result<Vec<OverrideSource>, OverridesError> {
    let Some(spec) = stack.component(name) else {
        return Ok(Vec::new());
    };
    match (spec.overrides.is_empty(), spec.value_overrides.is_empty()) {
        (false, false) => Err(OverridesError::Conflicting(name.to_string())),
        (true, false) => {
            overrides::from_legacy(&spec.value_overrides).map_err(|source| OverridesError::Legacy {
                component: name.to_string(),
                source,
            })
        }
        _ => Ok(overrides::from_current(&spec.overrides)),
    }
}

/// Immutable, dependency-ordered component list
#[derive(Debug, Clone)]
pub struct Registry {
    components: Vec<Arc<dyn Component>>,
}

impl Registry {
    /// Validate and order components; dependencies come before dependents,
    /// otherwise declaration order is kept
    pub fn new(components: Vec<Arc<dyn Component>>) -> Result<Self, RegistryError> {
        let mut by_name: BTreeMap<&str, usize> = BTreeMap::new();
        for (idx, component) in components.iter().enumerate() {
            if by_name.insert(component.name(), idx).is_some() {
                return Err(RegistryError::Duplicate(component.name().to_string()));
            }
        }
        for component in &components {
            for dependency in component.dependencies() {
                if !by_name.contains_key(dependency.as_str()) {
                    return Err(RegistryError::UnknownDependency {
                        component: component.name().to_string(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }

        let mut placed: BTreeSet<&str> = BTreeSet::new();
        let mut order: Vec<usize> = Vec::with_capacity(components.len());
        while order.len() < components.len() {
            let next = components.iter().enumerate().find(|(idx, c)| {
                !order.contains(idx)
                    && c.dependencies().iter().all(|d| placed.contains(d.as_str()))
            });
            let Some((idx, component)) = next else {
                let stuck = components
                    .iter()
                    .filter(|c| !placed.contains(c.name()))
                    .map(|c| c.name().to_string())
                    .collect();
                return Err(RegistryError::Cycle(stuck));
            };
            placed.insert(component.name());
            order.push(idx);
        }

        let ordered = order
            .into_iter()
            .map(|idx| Arc::clone(&components[idx]))
            .collect();
        Ok(Self {
            components: ordered,
        })
    }

    pub fn from_descriptors(descriptors: Vec<ComponentDescriptor>) -> Result<Self, RegistryError> {
        Self::new(
            descriptors
                .into_iter()
                .map(|d| Arc::new(DescriptorComponent::new(d)) as Arc<dyn Component>)
                .collect(),
        )
    }

    pub fn from_yaml(raw: &str) -> Result<Self, RegistryError> {
        Self::from_descriptors(serde_yaml::from_str(raw)?)
    }

    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let raw = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    /// All components, dependencies first
    pub fn components(&self) -> impl Iterator<Item = &Arc<dyn Component>> {
        self.components.iter()
    }

    /// Components driven through Modules
    pub fn module_components(&self) -> impl Iterator<Item = &Arc<dyn Component>> {
        self.components.iter().filter(|c| c.should_use_module())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Component>> {
        self.components.iter().find(|c| c.name() == name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ComponentSpec, LegacyOverride, LegacyOverrideKind, Overrides, StackSpec};

    fn registry(yaml: &str) -> Result<Registry, RegistryError> {
        Registry::from_yaml(yaml)
    }

    #[test]
    fn test_dependencies_ordered_first() {
        let reg = registry(
            r"
- name: app
  namespace: app
  dependencies: [db, cache]
- name: db
  namespace: db
- name: cache
  namespace: cache
  dependencies: [db]
",
        )
        .unwrap();
        let names: Vec<&str> = reg.components().map(|c| c.name()).collect();
        assert_eq!(names, vec!["db", "cache", "app"]);
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let err = registry("- name: app\n  namespace: app\n  dependencies: [db]\n").unwrap_err();
        assert!(matches!(err, RegistryError::UnknownDependency { .. }));
    }

    #[test]
    fn test_cycle_rejected() {
        let err = registry(
            "- name: a\n  namespace: a\n  dependencies: [b]\n- name: b\n  namespace: b\n  dependencies: [a]\n",
        )
        .unwrap_err();
        match err {
            RegistryError::Cycle(names) => assert_eq!(names, vec!["a", "b"]),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_rejected() {
        let err = registry("- name: a\n  namespace: a\n- name: a\n  namespace: b\n").unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate(name) if name == "a"));
    }

    #[test]
    fn test_both_override_shapes_rejected() {
        let mut spec = StackSpec::default();
        spec.components.insert(
            "alpha".into(),
            ComponentSpec {
                overrides: vec![Overrides {
                    values: Some(serde_json::json!({"a": 1})),
                    ..Overrides::default()
                }],
                value_overrides: vec![LegacyOverride {
                    kind: LegacyOverrideKind::Values,
                    name: None,
                    key: None,
                    optional: None,
                    values: Some(serde_json::json!({"b": 1})),
                }],
                ..ComponentSpec::default()
            },
        );
        let stack = Stack::new("s", spec);
        assert!(matches!(
            component_overrides(&stack, "alpha"),
            Err(OverridesError::Conflicting(_))
        ));
        assert!(component_overrides(&stack, "beta").unwrap().is_empty());
    }
}
