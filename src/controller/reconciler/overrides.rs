//! # Override Propagation
//!
//! Renders a component's configuration into what its Module consumes:
//!
//! - CR-derived settings are written as JSON into the Secret `{module}-overrides`
//!   under [`GENERATED_OVERRIDES_KEY`] and listed first in `valuesFrom`
//! - user Secrets and ConfigMaps are copied from the Stack's namespace into the
//!   component namespace as `{module}-{name}` and referenced by the copy name
//! - inline values are deep-merged in declaration order
//!
//! Every copy carries the owner label [`LABEL_MODULE_OWNER`], so it can be
//! found by selector and removed together with its Module.

use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use super::types::{Reconciler, ReconcilerError};
use crate::constants::{GENERATED_OVERRIDES_KEY, GENERATED_OVERRIDES_SUFFIX, LABEL_MODULE_OWNER};
use crate::crd::{KeyRef, Module, OverrideSource, Stack, ValuesFromSource};
use crate::merge::merge_all;
use crate::registry::{Component, Registry};
use crate::store::retry::{RetryPolicy, WriteTarget};
use crate::store::{create_or_update, update_with_retry, StoreResult, Stores};

/// A copy living in the component namespace
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum CopyRef {
    Secret(String),
    ConfigMap(String),
}

/// Module inputs rendered for one component
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderedValues {
    pub values: Option<Value>,
    pub values_from: Vec<ValuesFromSource>,
    pub copies: Vec<CopyRef>,
    /// A copy or the generated Secret was created, changed or removed
    pub changed: bool,
}

#[must_use]
pub fn generated_secret_name(module: &str) -> String {
    format!("{module}-{GENERATED_OVERRIDES_SUFFIX}")
}

#[must_use]
pub fn copy_name(module: &str, original: &str) -> String {
    format!("{module}-{original}")
}

#[must_use]
pub fn owner_selector(module: &str) -> String {
    format!("{LABEL_MODULE_OWNER}={module}")
}

fn owned_meta(namespace: &str, name: &str, module: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(BTreeMap::from([(
            LABEL_MODULE_OWNER.to_string(),
            module.to_string(),
        )])),
        ..ObjectMeta::default()
    }
}

fn ensure_owner_label(meta: &mut ObjectMeta, module: &str) {
    meta.labels
        .get_or_insert_with(BTreeMap::new)
        .insert(LABEL_MODULE_OWNER.to_string(), module.to_string());
}

fn secret_ref(name: String, key: &str, optional: Option<bool>) -> ValuesFromSource {
    ValuesFromSource {
        secret_ref: Some(KeyRef {
            name,
            key: key.to_string(),
            optional,
        }),
        config_map_ref: None,
    }
}

fn config_map_ref(name: String, key: &str, optional: Option<bool>) -> ValuesFromSource {
    ValuesFromSource {
        secret_ref: None,
        config_map_ref: Some(KeyRef {
            name,
            key: key.to_string(),
            optional,
        }),
    }
}

/// Render the values of `component` for the Stack `stack` (whose namespace
/// holds the user originals) using the settings of `effective`
pub async fn render(
    ctx: &Reconciler,
    stack: &Stack,
    effective: &Stack,
    component: &dyn Component,
) -> Result<RenderedValues, ReconcilerError> {
    let module = component.name();
    let target_ns = component.namespace();
    let source_ns = stack.metadata.namespace.as_deref().unwrap_or("default");
    let mut rendered = RenderedValues::default();

    let generated = generated_secret_name(module);
    match component.module_config(effective) {
        Some(config) => {
            let payload = serde_json::to_string(&config)?;
            let (_, result) = create_or_update(
                ctx.stores.secrets.as_ref(),
                Some(target_ns),
                &generated,
                || Secret {
                    metadata: owned_meta(target_ns, &generated, module),
                    ..Secret::default()
                },
                |secret: &mut Secret| {
                    ensure_owner_label(&mut secret.metadata, module);
                    secret.data = Some(BTreeMap::from([(
                        GENERATED_OVERRIDES_KEY.to_string(),
                        ByteString(payload.clone().into_bytes()),
                    )]));
                },
            )
            .await?;
            rendered.changed |= result.changed();
            rendered
                .values_from
                .push(secret_ref(generated.clone(), GENERATED_OVERRIDES_KEY, None));
            rendered.copies.push(CopyRef::Secret(generated));
        }
        None => {
            if ctx.stores.secrets.delete(Some(target_ns), &generated).await? {
                rendered.changed = true;
            }
        }
    }

    let mut inline = Vec::new();
    for source in component.overrides(effective)? {
        match source {
            OverrideSource::Values(values) => inline.push(values),
            OverrideSource::Secret(reference) => {
                let Some(original) = ctx
                    .stores
                    .secrets
                    .get(Some(source_ns), &reference.name)
                    .await?
                else {
                    if reference.is_optional() {
                        debug!("Optional secret {}/{} not found, skipping", source_ns, reference.name);
                        continue;
                    }
                    return Err(ReconcilerError::MissingOverrideSource {
                        component: module.to_string(),
                        kind: "Secret",
                        name: reference.name,
                    });
                };
                let name = copy_name(module, &reference.name);
                let (_, result) = create_or_update(
                    ctx.stores.secrets.as_ref(),
                    Some(target_ns),
                    &name,
                    || Secret {
                        metadata: owned_meta(target_ns, &name, module),
                        ..Secret::default()
                    },
                    |copy: &mut Secret| {
                        ensure_owner_label(&mut copy.metadata, module);
                        copy.data.clone_from(&original.data);
                        copy.type_.clone_from(&original.type_);
                    },
                )
                .await?;
                rendered.changed |= result.changed();
                rendered
                    .values_from
                    .push(secret_ref(name.clone(), &reference.key, reference.optional));
                rendered.copies.push(CopyRef::Secret(name));
            }
            OverrideSource::ConfigMap(reference) => {
                let Some(original) = ctx
                    .stores
                    .config_maps
                    .get(Some(source_ns), &reference.name)
                    .await?
                else {
                    if reference.is_optional() {
                        debug!("Optional configmap {}/{} not found, skipping", source_ns, reference.name);
                        continue;
                    }
                    return Err(ReconcilerError::MissingOverrideSource {
                        component: module.to_string(),
                        kind: "ConfigMap",
                        name: reference.name,
                    });
                };
                let name = copy_name(module, &reference.name);
                let (_, result) = create_or_update(
                    ctx.stores.config_maps.as_ref(),
                    Some(target_ns),
                    &name,
                    || ConfigMap {
                        metadata: owned_meta(target_ns, &name, module),
                        ..ConfigMap::default()
                    },
                    |copy: &mut ConfigMap| {
                        ensure_owner_label(&mut copy.metadata, module);
                        copy.data.clone_from(&original.data);
                        copy.binary_data.clone_from(&original.binary_data);
                    },
                )
                .await?;
                rendered.changed |= result.changed();
                rendered
                    .values_from
                    .push(config_map_ref(name.clone(), &reference.key, reference.optional));
                rendered.copies.push(CopyRef::ConfigMap(name));
            }
        }
    }
    rendered.values = merge_all(inline);

    if prune_stale_copies(&ctx.stores, target_ns, module, &rendered.copies).await? > 0 {
        rendered.changed = true;
    }
    Ok(rendered)
}

/// Delete owner-labelled copies that the current rendering no longer uses
async fn prune_stale_copies(
    stores: &Stores,
    namespace: &str,
    module: &str,
    keep: &[CopyRef],
) -> StoreResult<usize> {
    let keep: BTreeSet<&CopyRef> = keep.iter().collect();
    let selector = owner_selector(module);
    let mut removed = 0;

    for secret in stores.secrets.list(Some(namespace), Some(&selector)).await? {
        let name = secret.name_any();
        if !keep.contains(&CopyRef::Secret(name.clone()))
            && stores.secrets.delete(Some(namespace), &name).await?
        {
            info!("Removed stale override copy secret {}/{}", namespace, name);
            removed += 1;
        }
    }
    for cm in stores.config_maps.list(Some(namespace), Some(&selector)).await? {
        let name = cm.name_any();
        if !keep.contains(&CopyRef::ConfigMap(name.clone()))
            && stores.config_maps.delete(Some(namespace), &name).await?
        {
            info!("Removed stale override copy configmap {}/{}", namespace, name);
            removed += 1;
        }
    }
    Ok(removed)
}

/// Owner-reference every copy to its Module so the cluster garbage collects
/// them if the Module is removed by other means
pub async fn adopt_copies(stores: &Stores, module: &Module, copies: &[CopyRef]) -> StoreResult<()> {
    let Some(owner) = module.controller_owner_ref(&()) else {
        return Ok(());
    };
    let namespace = module.metadata.namespace.as_deref();
    let policy = RetryPolicy::default();
    for copy in copies {
        let adopt = |meta: &mut ObjectMeta| {
            let refs = meta.owner_references.get_or_insert_with(Vec::new);
            if refs.iter().any(|r| r.uid == owner.uid) {
                return false;
            }
            refs.push(owner.clone());
            true
        };
        match copy {
            CopyRef::Secret(name) => {
                update_with_retry(
                    stores.secrets.as_ref(),
                    namespace,
                    name,
                    WriteTarget::Object,
                    policy,
                    |s: &mut Secret| adopt(&mut s.metadata),
                )
                .await?;
            }
            CopyRef::ConfigMap(name) => {
                update_with_retry(
                    stores.config_maps.as_ref(),
                    namespace,
                    name,
                    WriteTarget::Object,
                    policy,
                    |c: &mut ConfigMap| adopt(&mut c.metadata),
                )
                .await?;
            }
        }
    }
    Ok(())
}

/// Delete every Secret and ConfigMap owner-labelled for `module`.
/// Returns how many objects were deleted; absent objects are not an error.
pub async fn delete_copies(stores: &Stores, namespace: &str, module: &str) -> StoreResult<usize> {
    let selector = owner_selector(module);
    let mut deleted = 0;
    for secret in stores.secrets.list(Some(namespace), Some(&selector)).await? {
        if stores.secrets.delete(Some(namespace), &secret.name_any()).await? {
            deleted += 1;
        }
    }
    for cm in stores.config_maps.list(Some(namespace), Some(&selector)).await? {
        if stores.config_maps.delete(Some(namespace), &cm.name_any()).await? {
            deleted += 1;
        }
    }
    Ok(deleted)
}

/// Names of user Secrets and ConfigMaps referenced by any enabled,
/// Module-driven component of the effective state
#[must_use]
pub fn referenced_names(registry: &Registry, effective: &Stack) -> BTreeSet<String> {
    registry
        .module_components()
        .filter(|c| c.is_enabled(effective))
        .filter_map(|c| c.overrides(effective).ok())
        .flatten()
        .filter_map(|source| source.referenced_name().map(str::to_string))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bom::Bom;
    use crate::config::ControllerConfig;
    use crate::controller::status_updater::{StatusUpdater, UpdaterSettings};
    use crate::crd::{ComponentSpec, Overrides, StackSpec};
    use crate::profile::ProfileResolver;
    use crate::store::MemoryStores;
    use serde_json::json;
    use std::sync::Arc;

    fn setup() -> (MemoryStores, Reconciler) {
        let memory = MemoryStores::new();
        let config = ControllerConfig::default();
        let updater = StatusUpdater::new(
            Arc::clone(&memory.stores().stacks),
            UpdaterSettings::from_config(&config),
        );
        let registry = Registry::from_yaml("- name: alpha\n  namespace: alpha-system\n  enabledByDefault: true\n").unwrap();
        let ctx = Reconciler::new(
            memory.stores(),
            Arc::new(registry),
            Arc::new(ProfileResolver::empty()),
            Bom::from_yaml("version: 1.0.0\ncomponents:\n  - name: alpha\n    version: 1.0.0\n").unwrap(),
            updater,
            config,
        );
        (memory, ctx)
    }

    fn stack(component: ComponentSpec) -> Stack {
        let mut spec = StackSpec::default();
        spec.components.insert("alpha".into(), component);
        let mut stack = Stack::new("platform", spec);
        stack.metadata.namespace = Some("stack-install".into());
        stack
    }

    fn key_ref(name: &str, optional: Option<bool>) -> KeyRef {
        KeyRef {
            name: name.into(),
            key: "values.yaml".into(),
            optional,
        }
    }

    fn user_secret(name: &str, payload: &str) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some("stack-install".into()),
                ..ObjectMeta::default()
            },
            data: Some(BTreeMap::from([(
                "values.yaml".to_string(),
                ByteString(payload.as_bytes().to_vec()),
            )])),
            ..Secret::default()
        }
    }

    fn alpha(ctx: &Reconciler) -> Arc<dyn Component> {
        Arc::clone(ctx.registry.get("alpha").unwrap())
    }

    #[tokio::test]
    async fn test_render_copies_sources_and_writes_generated_secret() {
        let (memory, ctx) = setup();
        memory.secrets.upsert(user_secret("tls-values", "tls: true")).unwrap();
        let stack = stack(ComponentSpec {
            config: Some(json!({"replicas": 2})),
            overrides: vec![
                Overrides {
                    values: Some(json!({"a": 1, "nested": {"x": 1}})),
                    ..Overrides::default()
                },
                Overrides {
                    secret_ref: Some(key_ref("tls-values", None)),
                    ..Overrides::default()
                },
                Overrides {
                    config_map_ref: Some(key_ref("absent", Some(true))),
                    ..Overrides::default()
                },
                Overrides {
                    values: Some(json!({"nested": {"y": 2}})),
                    ..Overrides::default()
                },
            ],
            ..ComponentSpec::default()
        });

        let rendered = render(&ctx, &stack, &stack, alpha(&ctx).as_ref()).await.unwrap();

        assert!(rendered.changed);
        assert_eq!(rendered.values, Some(json!({"a": 1, "nested": {"x": 1, "y": 2}})));
        let names: Vec<_> = rendered
            .values_from
            .iter()
            .filter_map(|v| v.secret_ref.as_ref().map(|r| r.name.as_str()))
            .collect();
        assert_eq!(names, vec!["alpha-overrides", "alpha-tls-values"]);
        assert!(rendered.values_from.iter().all(|v| v.config_map_ref.is_none()));

        let generated = memory.secrets.get_now(Some("alpha-system"), "alpha-overrides").unwrap();
        let payload = &generated.data.as_ref().unwrap()[GENERATED_OVERRIDES_KEY];
        assert_eq!(
            serde_json::from_slice::<Value>(&payload.0).unwrap(),
            json!({"replicas": 2})
        );

        let copy = memory.secrets.get_now(Some("alpha-system"), "alpha-tls-values").unwrap();
        assert_eq!(copy.labels().get(LABEL_MODULE_OWNER).map(String::as_str), Some("alpha"));
        assert_eq!(copy.data, user_secret("tls-values", "tls: true").data);

        // Same inputs again: nothing to write
        let again = render(&ctx, &stack, &stack, alpha(&ctx).as_ref()).await.unwrap();
        assert!(!again.changed);
    }

    #[tokio::test]
    async fn test_missing_required_source_is_an_error() {
        let (_memory, ctx) = setup();
        let stack = stack(ComponentSpec {
            overrides: vec![Overrides {
                config_map_ref: Some(key_ref("absent", None)),
                ..Overrides::default()
            }],
            ..ComponentSpec::default()
        });

        let err = render(&ctx, &stack, &stack, alpha(&ctx).as_ref()).await.unwrap_err();
        assert!(matches!(
            err,
            ReconcilerError::MissingOverrideSource { kind: "ConfigMap", ref name, .. } if name == "absent"
        ));
    }

    #[tokio::test]
    async fn test_dropped_reference_prunes_copy_and_delete_removes_the_rest() {
        let (memory, ctx) = setup();
        memory.secrets.upsert(user_secret("tls-values", "tls: true")).unwrap();
        let with_ref = stack(ComponentSpec {
            config: Some(json!({"replicas": 1})),
            overrides: vec![Overrides {
                secret_ref: Some(key_ref("tls-values", None)),
                ..Overrides::default()
            }],
            ..ComponentSpec::default()
        });
        render(&ctx, &with_ref, &with_ref, alpha(&ctx).as_ref()).await.unwrap();
        assert!(memory.secrets.contains(Some("alpha-system"), "alpha-tls-values"));

        let without_ref = stack(ComponentSpec {
            config: Some(json!({"replicas": 1})),
            ..ComponentSpec::default()
        });
        let rendered = render(&ctx, &without_ref, &without_ref, alpha(&ctx).as_ref())
            .await
            .unwrap();
        assert!(rendered.changed);
        assert!(!memory.secrets.contains(Some("alpha-system"), "alpha-tls-values"));
        assert!(memory.secrets.contains(Some("alpha-system"), "alpha-overrides"));

        let deleted = delete_copies(&ctx.stores, "alpha-system", "alpha").await.unwrap();
        assert_eq!(deleted, 1);
        assert!(memory.secrets.all().iter().all(|s| s.namespace().as_deref() != Some("alpha-system")));
        // The user original is untouched
        assert!(memory.secrets.contains(Some("stack-install"), "tls-values"));
    }

    #[test]
    fn test_referenced_names_skips_disabled_components() {
        let (_memory, ctx) = setup();
        let mut disabled = stack(ComponentSpec {
            overrides: vec![Overrides {
                secret_ref: Some(key_ref("tls-values", None)),
                ..Overrides::default()
            }],
            ..ComponentSpec::default()
        });
        assert!(referenced_names(&ctx.registry, &disabled).contains("tls-values"));

        if let Some(spec) = disabled.spec.components.get_mut("alpha") {
            spec.enabled = Some(false);
        }
        assert!(referenced_names(&ctx.registry, &disabled).is_empty());
    }
}
