// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Stratus
//!
//! A declarative, idempotent resource reconciler with pluggable providers.
//!
//! ## Overview
//!
//! Stratus turns a YAML description of interdependent resources into a
//! running system and keeps a durable snapshot of what it created, so that:
//!
//! - Configurations are applied as a dependency-ordered, parallel plan
//! - Attribute expressions like `${vnet.id}` flow outputs between resources
//! - Reapplying an unchanged configuration performs no provider calls
//! - Changes to immutable attributes trigger replacement, not update
//!
//! ## Architecture
//!
//! The engine works in four phases:
//!
//! 1. **Graph**: Declarations become a validated dependency DAG
//! 2. **Diff**: Declarations are compared against the last snapshot
//! 3. **Plan**: Diffs become an ordered set of create/update/replace/delete operations
//! 4. **Apply**: Operations run concurrently under the DAG constraints,
//!    committing each result to the snapshot as it lands
//!
//! ## Modules
//!
//! - [`config`]: Configuration parsing, validation, and spec hashing
//! - [`graph`]: Resource graph construction and dependency resolution
//! - [`outputs`]: Output propagation between dependent resources
//! - [`state`]: Snapshot storage backends (local, S3, in-memory)
//! - [`provider`]: Provider trait, per-type policies, and the simulated provider
//! - [`planner`]: State diffing and plan generation
//! - [`apply`]: Concurrent plan execution with retries and cancellation
//! - [`reconciler`]: High-level plan/apply/destroy orchestration
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! project:
//!   name: aks-demo
//!   environment: dev
//!
//! resources:
//!   - type: resource-group
//!     name: rg
//!     attributes:
//!       location: westeurope
//!   - type: virtual-network
//!     name: vnet
//!     attributes:
//!       resource_group: ${rg.name}
//!       address_space: 10.0.0.0/16
//!
//! exports:
//!   network_id: ${vnet.id}
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod apply;
pub mod cli;
pub mod config;
pub mod error;
pub mod graph;
pub mod outputs;
pub mod planner;
pub mod provider;
pub mod reconciler;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use apply::{ApplyExecutor, ApplyReport, ResourceOutcome};
pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, ConfigValidator, SpecHasher, StratusConfig};
pub use error::{Result, StratusError};
pub use graph::{DependencyResolver, GraphBuilder, ResourceGraph, ResourceId};
pub use outputs::{cancel_channel, OutputRegistry};
pub use planner::{Plan, Planner, StateDiffer};
pub use provider::{Provider, ProviderRegistry, ResourcePolicy, SimProvider};
pub use reconciler::Reconciler;
pub use state::{LocalSnapshotStore, MemorySnapshotStore, S3SnapshotStore, Snapshot, SnapshotStore};
