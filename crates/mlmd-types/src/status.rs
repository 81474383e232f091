//! Lifecycle status published for the unit
//!
//! A [`Status`] is a [`StatusKind`] plus a human-readable message. Kinds are
//! ordered by severity: `Blocked > Error > Waiting > Maintenance > Active`.

use serde::{Deserialize, Serialize};

/// Status kinds, declared from least to most severe so the derived ordering
/// is the severity ordering.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    /// Everything this unit is responsible for is in place.
    Active,
    /// The operator is performing work that needs no intervention.
    Maintenance,
    /// Transient condition, expected to resolve without intervention.
    Waiting,
    /// A collaborator call failed unexpectedly.
    Error,
    /// A human has to act (configuration, relations, trust).
    Blocked,
}

impl StatusKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusKind::Active => "active",
            StatusKind::Maintenance => "maintenance",
            StatusKind::Waiting => "waiting",
            StatusKind::Error => "error",
            StatusKind::Blocked => "blocked",
        }
    }
}

impl std::fmt::Display for StatusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status with an optional message (empty string when absent).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Status {
    pub kind: StatusKind,
    #[serde(default)]
    pub message: String,
}

impl Status {
    pub fn new(kind: StatusKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn active() -> Self {
        Self::new(StatusKind::Active, "")
    }

    pub fn waiting(message: impl Into<String>) -> Self {
        Self::new(StatusKind::Waiting, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(StatusKind::Error, message)
    }

    pub fn blocked(message: impl Into<String>) -> Self {
        Self::new(StatusKind::Blocked, message)
    }

    pub fn is_active(&self) -> bool {
        self.kind == StatusKind::Active
    }

    /// Prefix the message with the originating component: `[name] message`.
    pub fn prefixed(&self, component: &str) -> Self {
        let message = if self.message.is_empty() {
            format!("[{}]", component)
        } else {
            format!("[{}] {}", component, self.message)
        };
        Self::new(self.kind, message)
    }

    /// First non-Active status in the given order, or Active if there is none.
    ///
    /// The order is the dependency order of the components that produced the
    /// statuses, so the first non-Active entry is the one blocking the rest.
    pub fn aggregate<'a, I>(statuses: I) -> Status
    where
        I: IntoIterator<Item = &'a Status>,
    {
        statuses
            .into_iter()
            .find(|s| !s.is_active())
            .cloned()
            .unwrap_or_else(Status::active)
    }

    /// Most severe status, ties resolved in favour of the earliest entry.
    pub fn most_severe<'a, I>(statuses: I) -> Option<&'a Status>
    where
        I: IntoIterator<Item = &'a Status>,
    {
        statuses.into_iter().fold(None, |worst, s| match worst {
            Some(w) if w.kind >= s.kind => Some(w),
            _ => Some(s),
        })
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::active()
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_severity_order() {
        assert!(StatusKind::Blocked > StatusKind::Error);
        assert!(StatusKind::Error > StatusKind::Waiting);
        assert!(StatusKind::Waiting > StatusKind::Maintenance);
        assert!(StatusKind::Maintenance > StatusKind::Active);
    }

    #[test]
    fn test_aggregate_all_active() {
        let statuses = vec![Status::active(), Status::active()];
        assert_eq!(Status::aggregate(&statuses), Status::active());
        assert_eq!(Status::aggregate(&Vec::<Status>::new()), Status::active());
    }

    #[test]
    fn test_aggregate_prefers_scan_order_over_severity() {
        let statuses = vec![
            Status::active(),
            Status::waiting("first"),
            Status::blocked("second"),
        ];
        assert_eq!(Status::aggregate(&statuses), Status::waiting("first"));
    }

    #[test]
    fn test_most_severe() {
        let statuses = vec![
            Status::waiting("a"),
            Status::blocked("b"),
            Status::blocked("c"),
        ];
        assert_eq!(Status::most_severe(&statuses), Some(&Status::blocked("b")));
        assert_eq!(Status::most_severe(&Vec::<Status>::new()), None);
    }

    #[test]
    fn test_prefixed() {
        let status = Status::waiting("Waiting for Pebble to be ready.").prefixed("mlmd-grpc-service");
        assert_eq!(
            status.message,
            "[mlmd-grpc-service] Waiting for Pebble to be ready."
        );
        assert_eq!(Status::active().prefixed("x").message, "[x]");
    }

    #[test]
    fn test_display() {
        assert_eq!(Status::blocked("nope").to_string(), "blocked: nope");
        assert_eq!(Status::active().to_string(), "active");
    }

    fn any_status() -> impl Strategy<Value = Status> {
        (0u8..5, "[a-z]{0,8}").prop_map(|(k, m)| {
            let kind = match k {
                0 => StatusKind::Active,
                1 => StatusKind::Maintenance,
                2 => StatusKind::Waiting,
                3 => StatusKind::Error,
                _ => StatusKind::Blocked,
            };
            Status::new(kind, m)
        })
    }

    proptest! {
        #[test]
        fn aggregate_is_first_non_active(statuses in prop::collection::vec(any_status(), 0..16)) {
            let aggregate = Status::aggregate(&statuses);
            match statuses.iter().position(|s| !s.is_active()) {
                Some(i) => prop_assert_eq!(&aggregate, &statuses[i]),
                None => prop_assert!(aggregate.is_active()),
            }
        }
    }
}
