//! # layerstack
//!
//! This library assembles the multi-repository source tree of an embedded
//! Linux build from layered YAML specification documents. It is used by the
//! `layerstack` command-line tool but the engine has no dependency on the
//! command line.
//!
//! ## Quick Example
//!
//! ```
//! use layerstack::config;
//! use std::path::Path;
//!
//! let doc = config::parse(
//!     "header:\n  version: 1\nmachine: qemux86-64\nrepos:\n  poky:\n    url: https://git.yoctoproject.org/poky\n",
//!     Path::new("kas.yml"),
//! )
//! .unwrap();
//! assert_eq!(doc.machine.as_deref(), Some("qemux86-64"));
//! assert!(doc.repos.contains_key("poky"));
//! ```
//!
//! ## Core Concepts
//!
//! - **Documents (`config`)**: the typed schema of a specification document.
//! - **Resolution (`resolver`, `merge`, `env`)**: walks the include graph in
//!   post-order, merges documents with later ones winning, applies the
//!   `overrides` pass, resolves `env` and finally the lock layer.
//! - **Locking (`lock`)**: pins every floating refspec to the commit it
//!   resolved to, in a sidecar document next to the root.
//! - **Repositories (`repository`, `git`)**: resolve, checkout, patch and diff
//!   against the system `git`, behind the mockable `GitOperations` trait.
//! - **Pipeline (`pipeline`, `context`)**: an ordered list of named steps run
//!   against one `RunContext`, with a skip set, fail-fast semantics and
//!   teardown on exit.
//! - **Plugins (`plugin`)**: the capability interface of command-line
//!   subcommands.
//!
//! ## Execution Flow
//!
//! 1.  **Resolve**: the root document and everything it includes are merged
//!     into a `MergedConfig`.
//! 2.  **Instantiate**: one `Repo` per declared repository.
//! 3.  **Run**: a `Macro` executes its steps (directories, environment,
//!     checkout, patches, build configuration, build) in order.
//! 4.  **Teardown**: steps registered for teardown (such as stopping the squid
//!     proxy) run whether or not the pipeline succeeded.

pub mod config;
pub mod context;
pub mod defaults;
pub mod diff;
pub mod env;
pub mod error;
pub mod git;
pub mod lock;
pub mod merge;
pub mod output;
pub mod pipeline;
pub mod plugin;
pub mod repository;
pub mod resolver;
