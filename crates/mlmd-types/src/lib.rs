//! MLMD Types - Core types for the MLMD operator
//!
//! The operator turns charm configuration and relation data into a running
//! ML Metadata gRPC server: a supervised process inside the workload
//! container, a Kubernetes `Service` in front of it, and the relation data
//! that lets dependent applications find it.
//!
//! ## Key Concepts
//!
//! - **Status**: lifecycle state with a severity order, published per unit
//! - **GrpcPort / CharmConfig**: validated charm configuration
//! - **Layer / Plan**: desired and observed process-supervision state
//! - **Resource / ResourceSelector**: Kubernetes object identity and manifests
//! - **Relation payloads**: gRPC service info, MySQL connection data and the
//!   schema version negotiation used on the `grpc` relation
//!
//! This crate performs no I/O.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod config;
pub mod relation;
pub mod resource;
pub mod status;
pub mod workload;

// Re-export main types
pub use config::{CharmConfig, ConfigError, GrpcPort, DEFAULT_GRPC_PORT};
pub use relation::{
    negotiate, Databag, DatabaseBackend, GrpcServiceInfo, MysqlConnection, Negotiation,
    RelationId, DATA_KEY, GRPC_SCHEMA_VERSION, SUPPORTED_VERSIONS_KEY,
};
pub use resource::{
    is_subset, list_map_key, Resource, ResourceKey, ResourceSelector, MANAGED_BY_LABEL,
};
pub use status::{Status, StatusKind};
pub use workload::{
    CheckLevel, CheckSpec, ContainerFile, Layer, Override, Plan, ServiceSpec, Startup, TcpCheck,
};
