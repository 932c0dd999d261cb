//! # Stack Operator
//!
//! A Kubernetes operator that installs, upgrades and uninstalls a
//! multi-component platform described by a single `Stack` resource.
//!
//! ## Overview
//!
//! 1. **Watching Stacks** - Reconciles every `Stack` across all namespaces
//! 2. **Module synchronization** - Creates, updates and deletes one `Module` per component
//! 3. **Override propagation** - Copies referenced Secrets and ConfigMaps next to each Module
//! 4. **Status tracking** - Conditions, component states and the upgrade gate live on the Stack status
//! 5. **Uninstall** - A finalizer drives Module, namespace and RBAC cleanup before the Stack goes away
//!
//! ## Usage
//!
//! See the [README.md](../README.md) for deployment instructions.

use anyhow::Result;
use tracing::{error, info};

use stack_operator::controller::availability::spawn_availability_observer;
use stack_operator::runtime::initialization::initialize;
use stack_operator::runtime::watch_loop::run_watch_loop;

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;

    let observer = spawn_availability_observer(
        std::sync::Arc::clone(&init.reconciler),
        init.reconciler.config.availability_interval_duration(),
    );

    let result = run_watch_loop(
        init.client,
        std::sync::Arc::clone(&init.reconciler),
        init.server_state,
    )
    .await;

    observer.abort();
    if let Err(e) = init.reconciler.updater.stop().await {
        error!("Status updater did not drain cleanly: {}", e);
    }
    info!("Stack Operator exited");
    result
}
