//! MLMD Operator - Hook entry point and production collaborators
//!
//! Every hook the platform dispatches runs the `mlmd-operator` binary once.
//! The binary:
//!
//! 1. Loads [`OperatorSettings`] and the unit's identity
//! 2. Parses the [`HookEvent`] from the dispatch path
//! 3. Validates the charm configuration
//! 4. Assembles the component graph ([`charm`]) over the production
//!    collaborators: Juju hook tools, the Pebble CLI and a kube-rs client
//! 5. Runs one reconcile pass and publishes the resulting status

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod charm;
pub mod error;
pub mod event;
pub mod hook_tools;
pub mod kube_api;
pub mod pebble;
pub mod process;
pub mod settings;

pub use charm::{build_reconciler, Charm, Collaborators, ConfigSource, Identity, StatusPublisher};
pub use error::{OperatorError, OperatorResult};
pub use event::{HookEvent, RelationEventKind};
pub use hook_tools::JujuHookTools;
pub use kube_api::KubeResourceApi;
pub use pebble::PebbleCli;
pub use process::{CommandError, CommandOutput, CommandRunner};
pub use settings::OperatorSettings;
