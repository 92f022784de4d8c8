//! The control-plane server of the storage transfer engine.
//!
//! This builds on top of the engine library and exposes the local HTTP
//! control plane that frontends submit job part orders to and poll for
//! progress.

pub mod config;
pub mod endpoints;
pub mod error;
pub mod http;
pub mod observability;
pub mod state;
