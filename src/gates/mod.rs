//! Pause and approval gates.
//!
//! Both gates poll the store at a fixed interval. They are re-entered on
//! every turn and never hold the store lock across an await.

use crate::errors::GateError;
use crate::state::{EventKind, Feature, NewEvent, PendingApproval, Role, RunStore};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How an approval gate was left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalOutcome {
    /// `approve_next_action` is off for this run.
    NotRequired,
    /// An operator cleared the request.
    Approved,
    /// Another request replaced ours; proceed without waiting.
    Superseded,
}

#[derive(Clone)]
pub struct Gates {
    store: Arc<RunStore>,
    poll_interval: Duration,
}

impl Gates {
    pub fn new(store: Arc<RunStore>, poll_interval: Duration) -> Self {
        Self {
            store,
            poll_interval,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Block while the run is paused. Emits `run.waiting` once per wait.
    pub async fn wait_while_paused(&self, gate: &str, round: u32) -> Result<(), GateError> {
        let mut announced = false;
        loop {
            let flags = self.store.run_flags();
            if !flags.running {
                return Err(GateError::RunNotActive { gate: gate.into() });
            }
            if !flags.paused {
                if announced {
                    tracing::debug!(gate, round, "Leaving pause gate");
                }
                return Ok(());
            }
            if !announced {
                self.emit(
                    NewEvent::new(EventKind::RunWaiting, format!("Paused at {}", gate))
                        .round(round)
                        .metadata(serde_json::json!({ "gate": gate })),
                );
                announced = true;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Ask the operator before `role` acts, when the run requires it.
    pub async fn await_approval(
        &self,
        round: u32,
        role: Role,
        gate: &str,
    ) -> Result<ApprovalOutcome, GateError> {
        let state = self.store.get_state();
        if !state.running {
            return Err(GateError::RunNotActive { gate: gate.into() });
        }
        if !state.has_feature(Feature::ApproveNextAction) {
            return Ok(ApprovalOutcome::NotRequired);
        }

        let id = Uuid::new_v4().to_string();
        self.store.set_pending_approval(Some(PendingApproval {
            id: id.clone(),
            round,
            agent: role,
            gate: gate.to_string(),
            requested_at: Utc::now(),
        }));
        self.emit(
            NewEvent::new(
                EventKind::ApprovalRequested,
                format!("Approval required before {} acts", role),
            )
            .round(round)
            .agent(role)
            .metadata(serde_json::json!({ "id": id, "gate": gate })),
        );

        loop {
            let flags = self.store.run_flags();
            if !flags.running {
                return Err(GateError::RunNotActive { gate: gate.into() });
            }
            match flags.pending_approval {
                None => return Ok(ApprovalOutcome::Approved),
                Some(current) if current != id => {
                    tracing::debug!(gate, superseded_by = %current, "Approval request superseded");
                    return Ok(ApprovalOutcome::Superseded);
                }
                Some(_) => tokio::time::sleep(self.poll_interval).await,
            }
        }
    }

    fn emit(&self, event: NewEvent) {
        if let Err(e) = self.store.append_event(event) {
            tracing::warn!("Dropped gate event: {}", e);
        }
    }
}
