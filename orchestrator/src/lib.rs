//! Steward Orchestrator Library
//!
//! Core modules for compiling deployment requests into provisioning plans,
//! generating instance boot payloads, executing plans against the cloud
//! control plane, and reconciling observed instance state.

pub mod bootscript;
pub mod compiler;
pub mod config;
pub mod errors;
pub mod gcp;
pub mod logs;
pub mod plan;
pub mod provision;
pub mod reconcile;
pub mod registry;
pub mod store;
pub mod utils;
