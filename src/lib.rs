//! Minimal self-hosted deployment platform.
//!
//! Apps are registered in a single JSON config, provisioned as a bare git
//! repo plus working copy under one root directory, and run as instances
//! of an external process supervisor. Deploys arrive either through a
//! `git push` to the bare repo (post-receive hook) or through provider
//! webhooks handled by the [`webhook`] gateway.

pub mod config;
pub mod errors;
pub mod hook;
pub mod lifecycle;
pub mod paths;
pub mod supervisor;
pub mod webhook;
