use crate::collaborators::LeadershipOracle;
use crate::component::Component;
use async_trait::async_trait;
use mlmd_types::Status;
use std::sync::Arc;

/// Defers the pass on every unit but the leader.
pub struct LeadershipGate {
    name: String,
    oracle: Arc<dyn LeadershipOracle>,
}

impl LeadershipGate {
    pub const NAME: &'static str = "leadership-gate";
    pub const WAITING_MESSAGE: &'static str = "Waiting for leadership";

    pub fn new(oracle: Arc<dyn LeadershipOracle>) -> Self {
        Self {
            name: Self::NAME.to_string(),
            oracle,
        }
    }
}

#[async_trait]
impl Component for LeadershipGate {
    fn name(&self) -> &str {
        &self.name
    }

    async fn status(&self) -> Status {
        if self.oracle.is_leader().await {
            Status::active()
        } else {
            Status::waiting(Self::WAITING_MESSAGE)
        }
    }

    fn defers_pass(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockLeadership;

    #[tokio::test]
    async fn test_gate_follows_leadership() {
        let oracle = Arc::new(MockLeadership::new(false));
        let gate = LeadershipGate::new(oracle.clone());
        assert_eq!(gate.status().await, Status::waiting("Waiting for leadership"));

        oracle.set_leader(true);
        assert!(gate.status().await.is_active());
        assert!(gate.execute().await.is_ok());
    }
}
