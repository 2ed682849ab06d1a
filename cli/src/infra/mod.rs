//! Infrastructure layer — concrete implementations of application port traits.
//!
//! This module contains all I/O-performing code: process execution, the
//! terraform and ansible adapters, local and S3 storage, and module loading.
//!
//! Imports from `crate::domain` and `crate::application::ports` are allowed.
//! Imports from `crate::commands` or `crate::output` are forbidden.

pub mod ansible;
pub mod command_runner;
pub mod identity;
pub mod module_repo;
pub mod storage;
pub mod terraform;
