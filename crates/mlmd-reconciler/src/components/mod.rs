//! Operator components
//!
//! Registered by the operator in this order:
//!
//! | Component               | Depends on                                   |
//! |-------------------------|----------------------------------------------|
//! | `leadership-gate`       |                                              |
//! | `kubernetes:service`    | leadership                                   |
//! | `relation:grpc`         | leadership                                   |
//! | `relation:mysql`        | leadership                                   |
//! | `chown-mounted-storage` | leadership                                   |
//! | `mlmd-grpc-service`     | leadership, `relation:mysql`, storage        |

mod database;
mod grpc_relation;
mod leadership;
mod resources;
mod service;
mod storage;

pub use database::DatabaseRelation;
pub use grpc_relation::GrpcRelationBroadcaster;
pub use leadership::LeadershipGate;
pub use resources::{GrpcServiceTemplate, KubernetesResources, RenderContext, ResourceTemplate};
pub use service::{server_args, sqlite_config, DesiredWorkload, MlmdService, ServiceSettings};
pub use storage::ChownMountedStorage;
