//! Relation payloads
//!
//! Two relations matter to the operator:
//!
//! - `grpc` (provided): advertises the service name and port to clients,
//!   after a schema version has been agreed with the remote application.
//! - `mysql` (required, optional): connection data for an external MySQL
//!   database. Without it the server uses an embedded SQLite database.

use crate::config::GrpcPort;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Flat key/value data exchanged on a relation.
pub type Databag = BTreeMap<String, String>;

/// Schema version this operator speaks on the `grpc` relation.
pub const GRPC_SCHEMA_VERSION: &str = "v1";

/// Databag key carrying the JSON list of supported schema versions.
pub const SUPPORTED_VERSIONS_KEY: &str = "_supported_versions";

/// Databag key carrying the versioned payload.
pub const DATA_KEY: &str = "data";

/// One established relation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelationId {
    pub name: String,
    pub id: u32,
}

impl RelationId {
    pub fn new(name: impl Into<String>, id: u32) -> Self {
        Self {
            name: name.into(),
            id,
        }
    }
}

impl std::fmt::Display for RelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.name, self.id)
    }
}

impl std::str::FromStr for RelationId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, id) = s
            .split_once(':')
            .ok_or_else(|| format!("relation id {:?} is not of the form name:id", s))?;
        let id = id
            .parse()
            .map_err(|_| format!("relation id {:?} has a non-numeric id", s))?;
        Ok(Self::new(name, id))
    }
}

/// Outcome of schema version negotiation with a remote application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Negotiation {
    /// The remote supports our version.
    Compatible,
    /// The remote has not published its versions yet.
    Pending,
    /// The remote published versions, none of which we speak.
    Incompatible { remote: Vec<String> },
}

/// Negotiate the `grpc` schema version from the remote databag.
pub fn negotiate(remote: &Databag) -> Negotiation {
    let Some(raw) = remote.get(SUPPORTED_VERSIONS_KEY) else {
        return Negotiation::Pending;
    };

    let versions: Vec<String> = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(_) => return Negotiation::Incompatible {
            remote: vec![raw.clone()],
        },
    };

    if versions.iter().any(|v| v == GRPC_SCHEMA_VERSION) {
        Negotiation::Compatible
    } else {
        Negotiation::Incompatible { remote: versions }
    }
}

/// What the `grpc` relation advertises.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrpcServiceInfo {
    pub name: String,
    pub port: GrpcPort,
}

impl GrpcServiceInfo {
    pub fn new(name: impl Into<String>, port: GrpcPort) -> Self {
        Self {
            name: name.into(),
            port,
        }
    }

    /// Databag carrying only our supported versions.
    pub fn versions_databag() -> Databag {
        let mut bag = Databag::new();
        bag.insert(
            SUPPORTED_VERSIONS_KEY.to_string(),
            format!("[\"{}\"]", GRPC_SCHEMA_VERSION),
        );
        bag
    }

    /// Full databag: supported versions plus the versioned payload.
    pub fn to_databag(&self) -> Databag {
        let mut bag = Self::versions_databag();
        let payload = serde_json::json!({
            "name": self.name,
            "port": self.port.to_string(),
        });
        bag.insert(DATA_KEY.to_string(), payload.to_string());
        bag
    }
}

/// Connection data published by a MySQL provider.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MysqlConnection {
    pub database: String,
    pub host: String,
    pub port: String,
    pub user: String,
    pub password: String,
}

impl MysqlConnection {
    const REQUIRED_KEYS: [&'static str; 5] = ["database", "host", "port", "user", "password"];

    /// Build from a remote databag, returning the missing keys on failure.
    pub fn from_databag(bag: &Databag) -> Result<Self, Vec<String>> {
        let missing: Vec<String> = Self::REQUIRED_KEYS
            .iter()
            .filter(|k| bag.get(**k).map_or(true, |v| v.is_empty()))
            .map(|k| k.to_string())
            .collect();

        if !missing.is_empty() {
            return Err(missing);
        }

        let get = |k: &str| bag.get(k).cloned().unwrap_or_default();
        Ok(Self {
            database: get("database"),
            host: get("host"),
            port: get("port"),
            user: get("user"),
            password: get("password"),
        })
    }
}

impl std::fmt::Debug for MysqlConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MysqlConnection")
            .field("database", &self.database)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Database the metadata store server is pointed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseBackend {
    /// Embedded SQLite file on the mounted storage.
    Sqlite,
    /// External MySQL from the `mysql` relation.
    Mysql(MysqlConnection),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bag(pairs: &[(&str, &str)]) -> Databag {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_negotiate() {
        assert_eq!(negotiate(&Databag::new()), Negotiation::Pending);
        assert_eq!(
            negotiate(&bag(&[(SUPPORTED_VERSIONS_KEY, r#"["v0", "v1"]"#)])),
            Negotiation::Compatible
        );
        assert_eq!(
            negotiate(&bag(&[(SUPPORTED_VERSIONS_KEY, r#"["v0"]"#)])),
            Negotiation::Incompatible {
                remote: vec!["v0".to_string()]
            }
        );
        assert!(matches!(
            negotiate(&bag(&[(SUPPORTED_VERSIONS_KEY, "garbage")])),
            Negotiation::Incompatible { .. }
        ));
    }

    #[test]
    fn test_grpc_databag() {
        let info = GrpcServiceInfo::new("mlmd", GrpcPort::new(8080).unwrap());
        let bag = info.to_databag();
        assert_eq!(bag.get(SUPPORTED_VERSIONS_KEY).unwrap(), r#"["v1"]"#);

        let data: serde_json::Value = serde_json::from_str(bag.get(DATA_KEY).unwrap()).unwrap();
        assert_eq!(data, serde_json::json!({"name": "mlmd", "port": "8080"}));

        // our own versions negotiate with ourselves
        assert_eq!(negotiate(&bag), Negotiation::Compatible);
    }

    #[test]
    fn test_mysql_connection_from_databag() {
        let full = bag(&[
            ("database", "unit-db"),
            ("host", "unit-host"),
            ("port", "unit-port"),
            ("user", "unit-user"),
            ("password", "unit-password"),
            ("root_password", "unit-root"),
        ]);
        let conn = MysqlConnection::from_databag(&full).unwrap();
        assert_eq!(conn.database, "unit-db");
        assert!(!format!("{:?}", conn).contains("unit-password"));

        let partial = bag(&[("database", "db"), ("host", "")]);
        let missing = MysqlConnection::from_databag(&partial).unwrap_err();
        assert_eq!(missing, vec!["host", "port", "user", "password"]);
    }

    #[test]
    fn test_relation_id_parse() {
        let id: RelationId = "grpc:3".parse().unwrap();
        assert_eq!(id, RelationId::new("grpc", 3));
        assert_eq!(id.to_string(), "grpc:3");
        assert!("grpc".parse::<RelationId>().is_err());
        assert!("grpc:x".parse::<RelationId>().is_err());
    }
}
