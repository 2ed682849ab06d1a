//! Domain layer — pure business logic, types, and validation.
//!
//! This module has zero imports from `crate::infra`, `crate::commands`,
//! `crate::application`, `tokio`, `std::fs`, `std::process`, or `std::net`.
//! All functions are synchronous and take data in, returning data out.

pub mod config;
pub mod deployment;
pub mod error;
pub mod health;
pub mod module;
pub mod state;
pub mod tfvars;

pub use config::{RunContext, StorageLocation};
pub use deployment::{Deployment, ParentRef, WorkspacePath};
pub use error::{DependencyError, ExitClass, StateError, StepError, StorageError, ValidationError};
pub use module::{BuiltinStep, CommandStep, ModuleDefinition, ModuleRepository, StepHandler};
pub use state::RunMarker;
