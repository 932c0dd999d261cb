//! # CRD Generator
//!
//! Generates the `Stack` and `Module` CustomResourceDefinition YAML from the
//! Rust type definitions.
//!
//! ## Usage
//!
//! ```bash
//! # Generate both CRDs
//! cargo run --bin crdgen > config/crd/stackops.yaml
//!
//! # Generate one and apply directly
//! cargo run --bin crdgen -- --kind stack | kubectl apply -f -
//! ```

use clap::{Parser, ValueEnum};
use kube::core::CustomResourceExt;
use stack_operator::crd::{Module, Stack};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Kind {
    Stack,
    Module,
    All,
}

#[derive(Debug, Parser)]
#[command(name = "crdgen", about = "Print the operator's CRDs as YAML")]
struct Args {
    /// Which CRD to print
    #[arg(long, value_enum, default_value = "all")]
    kind: Kind,
}

fn main() {
    let args = Args::parse();
    let crds = match args.kind {
        Kind::Stack => vec![Stack::crd()],
        Kind::Module => vec![Module::crd()],
        Kind::All => vec![Stack::crd(), Module::crd()],
    };

    let mut documents = Vec::with_capacity(crds.len());
    for crd in &crds {
        match serde_yaml::to_string(crd) {
            Ok(yaml) => documents.push(yaml),
            Err(e) => {
                eprintln!("Failed to serialize CRD to YAML: {e}");
                std::process::exit(1);
            }
        }
    }
    print!("{}", documents.join("---\n"));
}
