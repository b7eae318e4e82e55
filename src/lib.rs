//! IAM Sync Agent Library
//!
//! Reconciles the IAM state (users, groups, policies) of multiple AWS
//! accounts against declarative desired state held in a Git repository,
//! assuming a per-account trust role for each pass.

pub mod aws;
pub mod config;
pub mod credentials;
pub mod diff;
pub mod error;
pub mod groups;
pub mod iam;
pub mod mail;
pub mod memory;
pub mod orchestrator;
pub mod policies;
pub mod registry;
pub mod source;
pub mod types;
pub mod users;

pub use config::SyncConfig;
pub use credentials::{CapabilityExchange, CredentialContext};
pub use error::{AccountError, IamError, Stage};
pub use iam::{Capability, IamOps};
pub use orchestrator::{Orchestrator, RunReport};
pub use types::{AccountDescriptor, DesiredState};
