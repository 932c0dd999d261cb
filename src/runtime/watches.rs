//! # Secondary Watches
//!
//! Map changes of related objects to the Stacks that need a reconcile:
//!
//! - Secrets and ConfigMaps, when a Stack's overrides reference them by name
//! - Modules, through their Stack labels
//! - Jobs, through their own Stack labels or else those of the Module that owns them

use k8s_openapi::api::batch::v1::Job;
use kube::ResourceExt;
use kube_runtime::reflector::ObjectRef;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::constants::{LABEL_STACK_NAME, LABEL_STACK_NAMESPACE};
use crate::controller::reconciler::overrides::referenced_names;
use crate::crd::{Module, Stack};
use crate::profile::EffectiveStateResolver;
use crate::registry::Registry;

/// Stacks in `namespace` whose effective overrides reference `name`
pub fn stacks_referencing(
    stacks: &[Arc<Stack>],
    registry: &Registry,
    resolver: &dyn EffectiveStateResolver,
    namespace: Option<&str>,
    name: &str,
) -> Vec<ObjectRef<Stack>> {
    stacks
        .iter()
        .filter(|stack| stack.metadata.namespace.as_deref() == namespace)
        .filter(|stack| match resolver.resolve(stack) {
            Ok(effective) => referenced_names(registry, &effective).contains(name),
            Err(e) => {
                debug!("Skipping {} in override mapping: {}", stack.key(), e);
                false
            }
        })
        .map(|stack| ObjectRef::from_obj(&**stack))
        .collect()
}

/// Stack named by the Stack labels, if both are present
#[must_use]
pub fn stack_from_labels(labels: &BTreeMap<String, String>) -> Option<ObjectRef<Stack>> {
    let name = labels.get(LABEL_STACK_NAME)?;
    let namespace = labels.get(LABEL_STACK_NAMESPACE)?;
    Some(ObjectRef::new(name).within(namespace))
}

/// A Job's own labels win; otherwise follow its owner reference to a Module
pub fn stack_for_job(job: &Job, modules: &[Arc<Module>]) -> Option<ObjectRef<Stack>> {
    if let Some(found) = stack_from_labels(job.labels()) {
        return Some(found);
    }
    let namespace = job.namespace();
    job.owner_references()
        .iter()
        .filter(|owner| owner.kind == "Module")
        .find_map(|owner| {
            modules
                .iter()
                .find(|m| m.name_any() == owner.name && m.namespace() == namespace)
                .and_then(|m| stack_from_labels(m.labels()))
        })
}
