//! In-memory collaborators
//!
//! Each mock keeps the state a real collaborator would hold and records
//! every write, so tests can assert that a second pass changes nothing.

use crate::collaborators::{
    ExecOutput, LeadershipOracle, RelationChannel, ResourceApi, WorkloadControl,
};
use crate::error::{ApiError, RelationError, WorkloadError};
use async_trait::async_trait;
use mlmd_types::{
    list_map_key, Databag, Layer, Plan, RelationId, Resource, ResourceKey, ResourceSelector,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Leadership that tests can flip.
#[derive(Debug, Default)]
pub struct MockLeadership {
    leader: AtomicBool,
}

impl MockLeadership {
    pub fn new(leader: bool) -> Self {
        Self {
            leader: AtomicBool::new(leader),
        }
    }

    pub fn set_leader(&self, leader: bool) {
        self.leader.store(leader, Ordering::SeqCst);
    }
}

#[async_trait]
impl LeadershipOracle for MockLeadership {
    async fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }
}

/// Object store standing in for the orchestration API.
///
/// `apply` merges the manifest into the stored object and adds the fields
/// a server would (`uid`, `resourceVersion`). Keyed lists such as
/// `spec.ports` are merged entry by entry: entries written by someone else
/// survive, entries this manager applied before and has since dropped are
/// removed.
#[derive(Debug, Default)]
pub struct MockResourceApi {
    objects: Mutex<BTreeMap<ResourceKey, serde_json::Value>>,
    last_applied: Mutex<BTreeMap<ResourceKey, serde_json::Value>>,
    applied: Mutex<Vec<ResourceKey>>,
    failure: Mutex<Option<ApiError>>,
}

impl MockResourceApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every subsequent call with this error, or stop failing.
    pub fn set_failure(&self, failure: Option<ApiError>) {
        *lock(&self.failure) = failure;
    }

    /// Keys of every successful apply, in order.
    pub fn applied(&self) -> Vec<ResourceKey> {
        lock(&self.applied).clone()
    }

    pub fn object(&self, key: &ResourceKey) -> Option<serde_json::Value> {
        lock(&self.objects).get(key).cloned()
    }

    /// Store an object as if someone else had written it.
    pub fn insert(&self, key: ResourceKey, manifest: serde_json::Value) {
        lock(&self.objects).insert(key, manifest);
    }

    fn check_failure(&self) -> Result<(), ApiError> {
        match lock(&self.failure).as_ref() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

fn merge(
    base: &mut serde_json::Value,
    patch: &serde_json::Value,
    previous: Option<&serde_json::Value>,
) {
    use serde_json::Value;

    match (base, patch) {
        (Value::Object(b), Value::Object(p)) => {
            for (k, v) in p {
                let prev = previous.and_then(|prev| prev.get(k));
                merge(b.entry(k.clone()).or_insert(Value::Null), v, prev);
            }
        }
        (Value::Array(b), Value::Array(p)) if p.iter().all(|e| list_map_key(e).is_some()) => {
            let owned_before = |key| {
                previous
                    .and_then(Value::as_array)
                    .map_or(false, |prev| prev.iter().any(|e| list_map_key(e) == key))
            };

            let mut merged = Vec::new();
            for entry in b.iter() {
                let key = list_map_key(entry);
                match p.iter().find(|e| list_map_key(e) == key) {
                    Some(patch_entry) => {
                        let mut entry = entry.clone();
                        merge(&mut entry, patch_entry, None);
                        merged.push(entry);
                    }
                    None if owned_before(key) => {}
                    None => merged.push(entry.clone()),
                }
            }
            for entry in p {
                let key = list_map_key(entry);
                if !b.iter().any(|e| list_map_key(e) == key) {
                    merged.push(entry.clone());
                }
            }
            *b = merged;
        }
        (b, p) => *b = p.clone(),
    }
}

#[async_trait]
impl ResourceApi for MockResourceApi {
    async fn apply(&self, resource: &Resource) -> Result<(), ApiError> {
        self.check_failure()?;

        let mut objects = lock(&self.objects);
        let generation = objects.len() + lock(&self.applied).len() + 1;
        let object = objects
            .entry(resource.key.clone())
            .or_insert_with(|| serde_json::json!({"metadata": {"uid": uuid::Uuid::new_v4().to_string()}}));
        let mut last_applied = lock(&self.last_applied);
        merge(object, &resource.manifest, last_applied.get(&resource.key));
        object["metadata"]["resourceVersion"] = serde_json::json!(generation.to_string());
        last_applied.insert(resource.key.clone(), resource.manifest.clone());

        lock(&self.applied).push(resource.key.clone());
        Ok(())
    }

    async fn list(&self, selector: &ResourceSelector) -> Result<Vec<serde_json::Value>, ApiError> {
        self.check_failure()?;
        Ok(lock(&self.objects)
            .values()
            .filter(|o| selector.selects(o))
            .cloned()
            .collect())
    }
}

/// A write made through [`MockWorkload`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkloadCall {
    Push { path: String },
    ReplaceLayer { label: String },
    Restart { services: Vec<String> },
    RunCommand { argv: Vec<String> },
}

#[derive(Debug, Default)]
struct WorkloadState {
    connected: bool,
    files: BTreeMap<String, String>,
    plan: Plan,
    running: BTreeSet<String>,
    owners: BTreeMap<String, String>,
    failing_commands: BTreeMap<String, String>,
    calls: Vec<WorkloadCall>,
}

/// Container with a process supervisor.
///
/// Understands `chown` and `stat -c %U:%G` well enough to track path
/// ownership; paths start out owned by `root:root`. Read-only commands
/// (`stat`) are not recorded as calls.
#[derive(Debug)]
pub struct MockWorkload {
    container: String,
    state: Mutex<WorkloadState>,
}

impl MockWorkload {
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            state: Mutex::new(WorkloadState {
                connected: true,
                ..WorkloadState::default()
            }),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        lock(&self.state).connected = connected;
    }

    /// Recorded writes, in order.
    pub fn calls(&self) -> Vec<WorkloadCall> {
        lock(&self.state).calls.clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.state).calls.clear();
    }

    pub fn plan(&self) -> Plan {
        lock(&self.state).plan.clone()
    }

    pub fn file(&self, path: &str) -> Option<String> {
        lock(&self.state).files.get(path).cloned()
    }

    /// Change a file behind the operator's back.
    pub fn put_file(&self, path: &str, content: &str) {
        lock(&self.state)
            .files
            .insert(path.to_string(), content.to_string());
    }

    pub fn owner(&self, path: &str) -> String {
        lock(&self.state)
            .owners
            .get(path)
            .cloned()
            .unwrap_or_else(|| "root:root".to_string())
    }

    /// Simulate a service exiting.
    pub fn stop_service(&self, name: &str) {
        lock(&self.state).running.remove(name);
    }

    /// Make every invocation of `program` exit 1 with this stderr.
    pub fn fail_command(&self, program: &str, stderr: &str) {
        lock(&self.state)
            .failing_commands
            .insert(program.to_string(), stderr.to_string());
    }

    fn connected(&self) -> Result<MutexGuard<'_, WorkloadState>, WorkloadError> {
        let state = lock(&self.state);
        if state.connected {
            Ok(state)
        } else {
            Err(WorkloadError::Unreachable(self.container.clone()))
        }
    }
}

#[async_trait]
impl WorkloadControl for MockWorkload {
    fn container(&self) -> &str {
        &self.container
    }

    async fn can_connect(&self) -> bool {
        lock(&self.state).connected
    }

    async fn push(&self, path: &str, content: &str, _make_dirs: bool) -> Result<(), WorkloadError> {
        let mut state = self.connected()?;
        state.files.insert(path.to_string(), content.to_string());
        state.calls.push(WorkloadCall::Push {
            path: path.to_string(),
        });
        Ok(())
    }

    async fn pull(&self, path: &str) -> Result<Option<String>, WorkloadError> {
        Ok(self.connected()?.files.get(path).cloned())
    }

    async fn replace_layer(&self, label: &str, layer: &Layer) -> Result<(), WorkloadError> {
        let mut state = self.connected()?;
        state.plan.combine(layer);
        state.calls.push(WorkloadCall::ReplaceLayer {
            label: label.to_string(),
        });
        Ok(())
    }

    async fn running_plan(&self) -> Result<Plan, WorkloadError> {
        Ok(self.connected()?.plan.clone())
    }

    async fn restart(&self, services: &[String]) -> Result<(), WorkloadError> {
        let mut state = self.connected()?;
        if let Some(unknown) = services.iter().find(|s| state.plan.service(s).is_none()) {
            return Err(WorkloadError::Command {
                command: "restart".to_string(),
                reason: format!("service {:?} does not exist", unknown),
            });
        }
        state.running.extend(services.iter().cloned());
        state.calls.push(WorkloadCall::Restart {
            services: services.to_vec(),
        });
        Ok(())
    }

    async fn is_running(&self, service: &str) -> Result<bool, WorkloadError> {
        Ok(self.connected()?.running.contains(service))
    }

    async fn run_command(&self, argv: &[String]) -> Result<ExecOutput, WorkloadError> {
        let mut state = self.connected()?;
        let program = argv.first().map(String::as_str).unwrap_or_default();

        if let Some(stderr) = state.failing_commands.get(program) {
            let output = ExecOutput {
                exit_code: 1,
                stdout: String::new(),
                stderr: stderr.clone(),
            };
            state.calls.push(WorkloadCall::RunCommand {
                argv: argv.to_vec(),
            });
            return Ok(output);
        }

        let argv_str: Vec<&str> = argv.iter().map(String::as_str).collect();
        match argv_str.as_slice() {
            ["stat", "-c", "%U:%G", path] => {
                let owner = state
                    .owners
                    .get(*path)
                    .cloned()
                    .unwrap_or_else(|| "root:root".to_string());
                Ok(ExecOutput {
                    exit_code: 0,
                    stdout: format!("{}\n", owner),
                    stderr: String::new(),
                })
            }
            ["chown", owner, path] => {
                state.owners.insert(path.to_string(), owner.to_string());
                state.calls.push(WorkloadCall::RunCommand {
                    argv: argv.to_vec(),
                });
                Ok(ExecOutput::default())
            }
            _ => {
                state.calls.push(WorkloadCall::RunCommand {
                    argv: argv.to_vec(),
                });
                Ok(ExecOutput {
                    exit_code: 127,
                    stdout: String::new(),
                    stderr: format!("{}: command not found", program),
                })
            }
        }
    }
}

#[derive(Debug, Default)]
struct RelationsState {
    next_id: u32,
    relations: BTreeMap<RelationId, (Databag, Databag)>,
    sends: Vec<RelationId>,
    failure: Option<String>,
}

/// Relations with remote data set by the test and local data recorded.
#[derive(Debug, Default)]
pub struct MockRelations {
    state: Mutex<RelationsState>,
}

impl MockRelations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Establish a relation with the given remote data.
    pub fn add_relation(&self, name: &str, remote: Databag) -> RelationId {
        let mut state = lock(&self.state);
        let id = RelationId::new(name, state.next_id);
        state.next_id += 1;
        state.relations.insert(id.clone(), (remote, Databag::new()));
        id
    }

    pub fn remove_relation(&self, id: &RelationId) {
        lock(&self.state).relations.remove(id);
    }

    pub fn set_remote(&self, id: &RelationId, remote: Databag) {
        if let Some(entry) = lock(&self.state).relations.get_mut(id) {
            entry.0 = remote;
        }
    }

    /// Data this side has published on the relation.
    pub fn published_data(&self, id: &RelationId) -> Databag {
        lock(&self.state)
            .relations
            .get(id)
            .map(|(_, local)| local.clone())
            .unwrap_or_default()
    }

    /// Relations written to, one entry per `send`.
    pub fn sends(&self) -> Vec<RelationId> {
        lock(&self.state).sends.clone()
    }

    /// Fail every subsequent call with this reason, or stop failing.
    pub fn set_failure(&self, reason: Option<&str>) {
        lock(&self.state).failure = reason.map(str::to_string);
    }

    fn state(&self, tool: &str) -> Result<MutexGuard<'_, RelationsState>, RelationError> {
        let state = lock(&self.state);
        match &state.failure {
            Some(reason) => Err(RelationError::Tool {
                tool: tool.to_string(),
                reason: reason.clone(),
            }),
            None => Ok(state),
        }
    }
}

#[async_trait]
impl RelationChannel for MockRelations {
    async fn relation_ids(&self, name: &str) -> Result<Vec<RelationId>, RelationError> {
        Ok(self
            .state("relation-ids")?
            .relations
            .keys()
            .filter(|id| id.name == name)
            .cloned()
            .collect())
    }

    async fn receive(&self, relation: &RelationId) -> Result<Databag, RelationError> {
        Ok(self
            .state("relation-get")?
            .relations
            .get(relation)
            .map(|(remote, _)| remote.clone())
            .unwrap_or_default())
    }

    async fn published(&self, relation: &RelationId) -> Result<Databag, RelationError> {
        Ok(self
            .state("relation-get")?
            .relations
            .get(relation)
            .map(|(_, local)| local.clone())
            .unwrap_or_default())
    }

    async fn send(&self, relation: &RelationId, data: &Databag) -> Result<(), RelationError> {
        let mut state = self.state("relation-set")?;
        let Some((_, local)) = state.relations.get_mut(relation) else {
            return Err(RelationError::Tool {
                tool: "relation-set".to_string(),
                reason: format!("relation {} not found", relation),
            });
        };
        local.extend(data.iter().map(|(k, v)| (k.clone(), v.clone())));
        state.sends.push(relation.clone());
        Ok(())
    }
}
