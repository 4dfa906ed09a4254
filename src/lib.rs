// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![warn(missing_docs)]                // All public items must be documented
#![warn(dead_code)]                   // Unused code is flagged
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness
#![warn(unused_imports)]              // Unused imports are flagged
#![warn(unused_variables)]            // Unused variables are flagged
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden

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
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # apicache deploy
//!
//! A declarative, idempotent reconciler for managed GraphQL API caches.
//!
//! ## Overview
//!
//! Describe the caches you want in a YAML file and let the engine converge
//! the control plane to it:
//!
//! - Attributes are validated against a per-kind schema before any remote call
//! - Tracked instances are re-read to detect drift
//! - Changes are planned as create, update, replace or delete and executed
//!   with bounded parallelism, never overlapping on the same instance
//! - State and run history persist locally or in S3
//!
//! ## Architecture
//!
//! 1. **Desired State**: defined in `apicache.deploy.yaml`, validated by [`schema`]
//! 2. **Stored State**: last observed attributes, kept by [`state`]
//! 3. **Remote State**: read through a [`provider`] adapter over a [`transport`]
//! 4. **Reconciler**: diffs, plans and executes the changes
//!
//! ## Modules
//!
//! - [`schema`]: Attribute descriptors and validation
//! - [`resource`]: Addresses, identifiers and the instance lifecycle
//! - [`transport`]: Control-plane client
//! - [`provider`]: Per-kind remote adapters
//! - [`config`]: Configuration parsing and validation
//! - [`state`]: State storage backends (local, S3)
//! - [`planner`]: Diff computation, planning and execution
//! - [`reconciler`]: Reconciliation engine
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! project:
//!   name: storefront
//!   environment: prod
//!
//! resources:
//!   - kind: api_cache
//!     name: primary
//!     attributes:
//!       api_id: abcdefghijklmnopqrstuvwxyz
//!       api_caching_behavior: FULL_REQUEST_CACHING
//!       ttl: 3600
//!       type: LARGE
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod planner;
pub mod provider;
pub mod reconciler;
pub mod resource;
pub mod schema;
pub mod state;
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, DeployConfig};
pub use error::{DeployError, Result};
pub use planner::{CancellationFlag, DeploymentPlan, DiffEngine, PlanExecutor};
pub use provider::{ApiCacheAdapter, ProviderRegistry, ResourceAdapter};
pub use reconciler::{DriftReport, ReconciliationResult, Reconciler, StatusReport};
pub use resource::{DesiredResource, InstanceState, ResourceAddr, ResourceId};
pub use schema::{AttributeSet, AttributeValue, ResourceSchema, ValidAttributes};
pub use state::{DeploymentState, LocalStateStore, S3StateStore, StateLedger, StateStore};
pub use transport::{ApiCacheTransport, HttpTransport, InMemoryTransport};
