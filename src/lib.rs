// ============================================================================
// Linting - Dangerous or non-idiomatic practices are flagged
// ============================================================================

#![forbid(unsafe_code)]               // Unsafe code is forbidden
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

//! # stack-deploy
//!
//! Change-set driven deployment of application bundles onto CloudFormation
//! stacks.
//!
//! ## Overview
//!
//! A deployment attempt:
//!
//! - Uploads a rendered plan document, the code bundle and static assets,
//!   skipping objects whose remote copy already matches
//! - Creates a change set, repairing the stack when it is stuck in a
//!   rollback, busy, or holds a stale change set
//! - Executes the change set and follows the stack events until the root
//!   stack settles
//! - Republishes the API stage when the stack declares one
//!
//! ## Modules
//!
//! - [`config`]: Configuration parsing, validation and the desired state
//! - [`retry`]: Bounded asynchronous polling
//! - [`assets`]: Idempotent uploads into the object store
//! - [`planner`]: Plan document rendering
//! - [`stack`]: Change-set negotiation and reconciliation
//! - [`api`]: API stage republishing
//! - [`orchestrator`]: End-to-end deployment
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! project:
//!   name: shop
//!   stage: prod
//!   region: eu-west-1
//!
//! deployment:
//!   bucket: shop-deploys
//!
//! bundle:
//!   path: dist/shop.zip
//!
//! resources:
//!   - kind: function
//!     name: web
//!     handler: index.handler
//!   - kind: api
//!     name: public
//!     function: web
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod api;
pub mod assets;
pub mod cli;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod planner;
pub mod retry;
pub mod stack;

// ============================================================================
// Re-exports
// ============================================================================

pub use assets::{AssetSynchronizer, ObjectStore, S3ObjectStore, SyncReport};
pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, ConfigValidator, DeployConfig, DesiredState};
pub use error::{DeployError, Result};
pub use orchestrator::{DeploymentOrchestrator, DeploymentResult, DeploymentResultBuilder, Timings};
pub use retry::{Poll, RetryPoller};
pub use stack::{
    ApplyOutcome, ChangeSetNegotiator, CloudFormationControlPlane, StackControlPlane,
    StackReconciler,
};
