//! MLMD Reconciler - Dependency-ordered component graph
//!
//! The operator is a set of [`Component`]s, each owning one part of the
//! desired state (a Kubernetes object, relation data, storage ownership, the
//! supervised server process). Components are registered in dependency order
//! and a [`Reconciler`] drives them one pass at a time:
//!
//! ```text
//! leadership-gate ─┬─> kubernetes:service
//!                  ├─> relation:grpc
//!                  ├─> relation:mysql ──────────┐
//!                  └─> chown-mounted-storage ───┴─> mlmd-grpc-service
//! ```
//!
//! A pass executes each component whose dependencies are Active, reads its
//! status, and stops at the first component that is not Active. The status
//! published for the unit is that component's status, prefixed with its name.
//!
//! Components talk to the outside world only through the collaborator traits
//! in [`collaborators`]; [`mock`] provides in-memory implementations of all
//! of them.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod collaborators;
pub mod component;
pub mod components;
pub mod error;
pub mod mock;
pub mod reconciler;

pub use collaborators::{ExecOutput, LeadershipOracle, RelationChannel, ResourceApi, WorkloadControl};
pub use component::{Component, ComponentHandle};
pub use components::{
    ChownMountedStorage, DatabaseRelation, GrpcRelationBroadcaster, GrpcServiceTemplate,
    KubernetesResources, LeadershipGate, MlmdService, RenderContext, ResourceTemplate,
    ServiceSettings,
};
pub use error::{ApiError, ComponentError, ReconcilerError, RelationError, Result, WorkloadError};
pub use reconciler::{ComponentStep, PassOutcome, ReconcileReport, Reconciler};
