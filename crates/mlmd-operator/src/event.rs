//! Hook events dispatched by the platform

use std::fmt;
use std::str::FromStr;

/// What happened to a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationEventKind {
    Created,
    Joined,
    Changed,
    Departed,
    Broken,
}

impl RelationEventKind {
    const ALL: [RelationEventKind; 5] = [
        RelationEventKind::Created,
        RelationEventKind::Joined,
        RelationEventKind::Changed,
        RelationEventKind::Departed,
        RelationEventKind::Broken,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RelationEventKind::Created => "created",
            RelationEventKind::Joined => "joined",
            RelationEventKind::Changed => "changed",
            RelationEventKind::Departed => "departed",
            RelationEventKind::Broken => "broken",
        }
    }
}

/// A hook, as named by `JUJU_DISPATCH_PATH` (`hooks/<name>`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookEvent {
    Install,
    UpgradeCharm,
    ConfigChanged,
    LeaderElected,
    LeaderSettingsChanged,
    Start,
    Stop,
    Remove,
    UpdateStatus,
    PebbleReady { container: String },
    StorageAttached { storage: String },
    StorageDetaching { storage: String },
    Relation { relation: String, kind: RelationEventKind },
    /// Anything else (actions, secrets, collect-metrics...)
    Other(String),
}

impl HookEvent {
    /// Whether this event runs a reconcile pass.
    pub fn triggers_reconcile(&self) -> bool {
        !matches!(
            self,
            HookEvent::Stop
                | HookEvent::Remove
                | HookEvent::StorageDetaching { .. }
                | HookEvent::Other(_)
        )
    }
}

impl FromStr for HookEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().trim_start_matches("hooks/");
        if name.is_empty() || name.contains('/') {
            return Err(format!("not a hook: {:?}", s));
        }

        let event = match name {
            "install" => HookEvent::Install,
            "upgrade-charm" => HookEvent::UpgradeCharm,
            "config-changed" => HookEvent::ConfigChanged,
            "leader-elected" => HookEvent::LeaderElected,
            "leader-settings-changed" => HookEvent::LeaderSettingsChanged,
            "start" => HookEvent::Start,
            "stop" => HookEvent::Stop,
            "remove" => HookEvent::Remove,
            "update-status" => HookEvent::UpdateStatus,
            _ => {
                if let Some(container) = name.strip_suffix("-pebble-ready") {
                    HookEvent::PebbleReady {
                        container: container.to_string(),
                    }
                } else if let Some(storage) = name.strip_suffix("-storage-attached") {
                    HookEvent::StorageAttached {
                        storage: storage.to_string(),
                    }
                } else if let Some(storage) = name.strip_suffix("-storage-detaching") {
                    HookEvent::StorageDetaching {
                        storage: storage.to_string(),
                    }
                } else {
                    RelationEventKind::ALL
                        .iter()
                        .find_map(|kind| {
                            name.strip_suffix(&format!("-relation-{}", kind.as_str()))
                                .map(|relation| HookEvent::Relation {
                                    relation: relation.to_string(),
                                    kind: *kind,
                                })
                        })
                        .unwrap_or_else(|| HookEvent::Other(name.to_string()))
                }
            }
        };
        Ok(event)
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookEvent::Install => f.write_str("install"),
            HookEvent::UpgradeCharm => f.write_str("upgrade-charm"),
            HookEvent::ConfigChanged => f.write_str("config-changed"),
            HookEvent::LeaderElected => f.write_str("leader-elected"),
            HookEvent::LeaderSettingsChanged => f.write_str("leader-settings-changed"),
            HookEvent::Start => f.write_str("start"),
            HookEvent::Stop => f.write_str("stop"),
            HookEvent::Remove => f.write_str("remove"),
            HookEvent::UpdateStatus => f.write_str("update-status"),
            HookEvent::PebbleReady { container } => write!(f, "{}-pebble-ready", container),
            HookEvent::StorageAttached { storage } => write!(f, "{}-storage-attached", storage),
            HookEvent::StorageDetaching { storage } => write!(f, "{}-storage-detaching", storage),
            HookEvent::Relation { relation, kind } => {
                write!(f, "{}-relation-{}", relation, kind.as_str())
            }
            HookEvent::Other(name) => f.write_str(name),
        }
    }
}
