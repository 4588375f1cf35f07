use super::{
    AgentMessage, AgentPatch, AgentPhase, AgentState, DEFAULT_EVENT_CAP, EnsembleResult,
    EventKind, LintResult, MessageLog, NewEvent, PendingApproval, Role, RoundSummary,
    RunDescriptor, RunEvent, RunOptions, RunState, Severity, upsert_by,
};
use crate::checkpoint::Checkpoint;
use crate::errors::StoreError;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use uuid::Uuid;

/// Callback invoked for every appended event.
pub type Listener = Arc<dyn Fn(&RunEvent) + Send + Sync>;

type ListenerList = Mutex<Vec<(u64, Listener)>>;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Events retained in the ring buffer. Messages get twice this.
    pub event_cap: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            event_cap: DEFAULT_EVENT_CAP,
        }
    }
}

struct Inner {
    state: RunState,
    next_event_id: u64,
    message_log: Option<MessageLog>,
    /// Appended but not yet handed to listeners, in id order.
    undelivered: VecDeque<RunEvent>,
}

/// Sole owner of mutable run data.
///
/// Each method performs one atomic update under an internal lock and
/// releases it before returning, so concurrent turns never observe a
/// half-applied change. Listeners are called synchronously, in event id
/// order, after the state lock is released. A listener may read the store
/// but must not append events.
pub struct RunStore {
    config: StoreConfig,
    inner: Mutex<Inner>,
    listeners: Arc<ListenerList>,
    delivery: Mutex<()>,
    next_listener_id: AtomicU64,
}

/// Lightweight view of the run's control flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFlags {
    pub running: bool,
    pub paused: bool,
    /// Id of the outstanding approval request.
    pub pending_approval: Option<String>,
}

/// Handle returned by [`RunStore::subscribe`].
pub struct Subscription {
    id: u64,
    listeners: Weak<ListenerList>,
}

impl Subscription {
    /// Stop receiving events. Safe to call after the store is gone.
    pub fn unsubscribe(self) {
        if let Some(listeners) = self.listeners.upgrade() {
            let mut list = listeners.lock().unwrap_or_else(|e| e.into_inner());
            list.retain(|(id, _)| *id != self.id);
        }
    }
}

impl Default for RunStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl RunStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: RunState::default(),
                next_event_id: 1,
                message_log: None,
                undelivered: VecDeque::new(),
            }),
            listeners: Arc::new(Mutex::new(Vec::new())),
            delivery: Mutex::new(()),
            next_listener_id: AtomicU64::new(1),
        }
    }

    pub fn event_cap(&self) -> usize {
        self.config.event_cap
    }

    pub fn message_cap(&self) -> usize {
        self.config.event_cap * 2
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply a mutation and bump the state version.
    fn mutate<R>(&self, f: impl FnOnce(&mut RunState) -> R) -> R {
        let mut inner = self.lock();
        let result = f(&mut inner.state);
        inner.state.version += 1;
        result
    }

    /// Deep, independent copy of the current run state.
    pub fn get_state(&self) -> RunState {
        self.lock().state.clone()
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&RunEvent) + Send + Sync + 'static,
    {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(listener)));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    pub fn start_run(&self, options: RunOptions) -> Result<RunDescriptor, StoreError> {
        let descriptor = {
            let mut inner = self.lock();
            if inner.state.running {
                return Err(StoreError::AlreadyRunning {
                    run_id: inner.state.run_id.clone().unwrap_or_default(),
                });
            }

            let run_id = Uuid::new_v4().to_string();
            let run_dir = options.artifacts_root().join(&run_id);
            let started_at = Utc::now();
            let version = inner.state.version + 1;

            inner.state = RunState {
                version,
                run_id: Some(run_id.clone()),
                mode: options.mode,
                workspace: Some(options.workspace.clone()),
                run_dir: Some(run_dir.clone()),
                goal: options.goal.clone(),
                max_rounds: options.max_rounds,
                running: true,
                features: options.features.clone(),
                started_at: Some(started_at),
                ..RunState::default()
            };
            inner.message_log = Some(MessageLog::new(&run_dir));
            inner.undelivered.clear();

            RunDescriptor {
                run_id,
                mode: options.mode,
                workspace: options.workspace,
                max_rounds: options.max_rounds,
                features: options.features,
                started_at,
                run_dir,
            }
        };

        let features: Vec<_> = descriptor.features.iter().map(|f| f.as_str()).collect();
        self.append_event(
            NewEvent::new(
                EventKind::RunStarted,
                format!(
                    "Run started in {} mode (max {} rounds)",
                    descriptor.mode, descriptor.max_rounds
                ),
            )
            .round(0)
            .metadata(serde_json::json!({
                "workspace": descriptor.workspace,
                "features": features,
            })),
        )?;

        Ok(descriptor)
    }

    pub fn append_event(&self, event: NewEvent) -> Result<RunEvent, StoreError> {
        let record = {
            let mut inner = self.lock();
            let run_id = inner
                .state
                .run_id
                .clone()
                .ok_or(StoreError::NoActiveRun)?;

            let record = RunEvent {
                id: inner.next_event_id,
                run_id,
                timestamp: Utc::now(),
                kind: event.kind,
                round: event.round.unwrap_or(inner.state.current_round),
                message: event.message,
                severity: event.severity,
                agent: event.agent,
                metadata: event.metadata,
            };
            inner.next_event_id += 1;

            let cap = self.config.event_cap;
            let events = &mut inner.state.events;
            events.push_back(record.clone());
            while events.len() > cap {
                events.pop_front();
            }
            inner.state.version += 1;
            inner.undelivered.push_back(record.clone());
            record
        };

        trace_event(&record);
        self.deliver_pending();
        Ok(record)
    }

    /// Drain undelivered events to listeners. Whoever holds the delivery
    /// lock delivers everything queued, so ordering follows event ids.
    fn deliver_pending(&self) {
        let _delivery = self.delivery.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            let Some(event) = self.lock().undelivered.pop_front() else {
                break;
            };
            let listeners: Vec<Listener> = self
                .listeners
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .iter()
                .map(|(_, l)| Arc::clone(l))
                .collect();
            for listener in listeners {
                listener(&event);
            }
        }
    }

    pub fn finish_run(&self, message: impl Into<String>) -> Result<RunEvent, StoreError> {
        let message = message.into();
        self.terminate(AgentPhase::Completed, message.clone())?;
        self.append_event(NewEvent::new(EventKind::RunFinished, message))
    }

    pub fn fail_run(&self, error: impl Into<String>) -> Result<RunEvent, StoreError> {
        let error = error.into();
        {
            let mut inner = self.lock();
            if inner.state.run_id.is_none() {
                return Err(StoreError::NoActiveRun);
            }
            inner.state.errors.push(error.clone());
        }
        self.terminate(AgentPhase::Failed, error.clone())?;
        self.append_event(NewEvent::new(EventKind::RunFailed, error).error())
    }

    fn terminate(&self, terminal: AgentPhase, outcome: String) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if inner.state.run_id.is_none() {
            return Err(StoreError::NoActiveRun);
        }
        let state = &mut inner.state;
        let now = Utc::now();
        state.running = false;
        state.paused = false;
        state.pending_approval = None;
        state.ended_at = Some(now);
        state.outcome = Some(outcome);
        for agent in state.agents.values_mut() {
            if agent.phase.is_active() {
                agent.phase = terminal;
                agent.ended_at = Some(now);
            }
        }
        state.version += 1;
        Ok(())
    }

    pub fn set_paused(&self, paused: bool, reason: Option<String>) {
        self.mutate(|s| {
            s.paused = paused;
            s.pause_reason = if paused { reason } else { None };
        });
    }

    /// Flip the pause flag when a run is active and the flag differs.
    /// Returns whether anything changed.
    pub fn toggle_pause(&self, paused: bool, reason: Option<String>) -> bool {
        let mut inner = self.lock();
        let state = &mut inner.state;
        if !state.running || state.paused == paused {
            return false;
        }
        state.paused = paused;
        state.pause_reason = if paused { reason } else { None };
        state.version += 1;
        true
    }

    /// Clear and return the outstanding approval request, if any.
    pub fn take_pending_approval(&self) -> Option<PendingApproval> {
        let mut inner = self.lock();
        let taken = inner.state.pending_approval.take();
        if taken.is_some() {
            inner.state.version += 1;
        }
        taken
    }

    /// The few fields gates poll, without cloning the whole state.
    pub fn run_flags(&self) -> RunFlags {
        let inner = self.lock();
        let state = &inner.state;
        RunFlags {
            running: state.running,
            paused: state.paused,
            pending_approval: state.pending_approval.as_ref().map(|p| p.id.clone()),
        }
    }

    pub fn set_pending_approval(&self, pending: Option<PendingApproval>) {
        self.mutate(|s| s.pending_approval = pending);
    }

    pub fn set_current_round(&self, round: u32) {
        self.mutate(|s| s.current_round = round);
    }

    pub fn set_agent_state(&self, role: Role, patch: AgentPatch) {
        self.mutate(|s| {
            s.agents
                .entry(role)
                .or_insert_with(|| AgentState::new(role))
                .apply(patch);
        });
    }

    /// Put every agent back to `queued` for a new round.
    pub fn reset_agents_for_round(&self, round: u32) {
        self.mutate(|s| {
            for (role, agent) in s.agents.iter_mut() {
                *agent = AgentState {
                    phase: AgentPhase::Queued,
                    round,
                    ..AgentState::new(*role)
                };
            }
        });
    }

    pub fn record_error(&self, error: impl Into<String>) {
        let error = error.into();
        self.mutate(|s| s.errors.push(error));
    }

    pub fn upsert_round(&self, summary: RoundSummary) {
        self.mutate(|s| upsert_by(&mut s.rounds, summary, |r| r.round));
    }

    pub fn upsert_lint_result(&self, result: LintResult) {
        self.mutate(|s| upsert_by(&mut s.lint_results, result, |r| r.round));
    }

    pub fn upsert_ensemble_result(&self, result: EnsembleResult) {
        self.mutate(|s| upsert_by(&mut s.ensemble_results, result, |r| r.round));
    }

    pub fn upsert_checkpoint(&self, checkpoint: Checkpoint) {
        self.mutate(|s| upsert_by(&mut s.checkpoints, checkpoint, |c| c.round));
    }

    /// Record a message in memory and append it to the round's log file.
    pub fn append_message(&self, message: AgentMessage) {
        let cap = self.message_cap();
        let log = {
            let mut inner = self.lock();
            let messages = &mut inner.state.messages;
            messages.push_back(message.clone());
            while messages.len() > cap {
                messages.pop_front();
            }
            inner.state.version += 1;
            inner.message_log.clone()
        };

        if let Some(log) = log
            && let Err(e) = log.append(&message)
        {
            tracing::warn!(round = message.round, "Failed to persist agent message: {:#}", e);
        }
    }
}

fn trace_event(event: &RunEvent) {
    let agent = event.agent.map(|a| a.as_str()).unwrap_or("-");
    match event.severity {
        Some(Severity::Error) => tracing::error!(
            id = event.id, round = event.round, agent, kind = %event.kind, "{}", event.message
        ),
        Some(Severity::Warning) => tracing::warn!(
            id = event.id, round = event.round, agent, kind = %event.kind, "{}", event.message
        ),
        _ => tracing::debug!(
            id = event.id, round = event.round, agent, kind = %event.kind, "{}", event.message
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Endpoint, ExecutionMode, Feature, MessageKind, RoundVerdict};
    use tempfile::tempdir;

    fn start(store: &RunStore, dir: &std::path::Path) -> RunDescriptor {
        store
            .start_run(
                RunOptions::new(dir, ExecutionMode::Demo)
                    .with_goal("ship it")
                    .with_feature(Feature::Checkpoints),
            )
            .unwrap()
    }

    #[test]
    fn test_append_event_before_start_fails() {
        let store = RunStore::default();
        let err = store
            .append_event(NewEvent::new(EventKind::RoundStarted, "too early"))
            .unwrap_err();
        assert_eq!(err, StoreError::NoActiveRun);
        assert!(store.get_state().events.is_empty());
    }

    #[test]
    fn test_start_run_emits_run_started() {
        let dir = tempdir().unwrap();
        let store = RunStore::default();
        let desc = start(&store, dir.path());

        let state = store.get_state();
        assert!(state.running);
        assert_eq!(state.run_id.as_deref(), Some(desc.run_id.as_str()));
        assert_eq!(state.goal, "ship it");
        assert!(state.has_feature(Feature::Checkpoints));
        assert_eq!(state.events.len(), 1);
        assert_eq!(state.events[0].kind, EventKind::RunStarted);
        assert_eq!(state.events[0].id, 1);
    }

    #[test]
    fn test_second_start_fails_without_mutation() {
        let dir = tempdir().unwrap();
        let store = RunStore::default();
        start(&store, dir.path());
        store.set_current_round(2);
        let before = store.get_state();

        let err = store
            .start_run(RunOptions::new(dir.path(), ExecutionMode::Local))
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyRunning { .. }));
        assert_eq!(store.get_state(), before);
    }

    #[test]
    fn test_event_ring_buffer_evicts_oldest_first() {
        let dir = tempdir().unwrap();
        let store = RunStore::new(StoreConfig { event_cap: 5 });
        start(&store, dir.path());
        for i in 0..12 {
            store
                .append_event(NewEvent::new(EventKind::AgentStage, format!("e{i}")))
                .unwrap();
        }

        let state = store.get_state();
        assert_eq!(state.events.len(), 5);
        let ids: Vec<u64> = state.events.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![9, 10, 11, 12, 13]);
        assert_eq!(state.events.back().unwrap().message, "e11");
    }

    #[test]
    fn test_snapshot_is_independent_of_later_mutation() {
        let dir = tempdir().unwrap();
        let store = RunStore::default();
        start(&store, dir.path());
        let snapshot = store.get_state();

        store.set_current_round(3);
        store.set_agent_state(Role::Auditor, AgentPatch::phase(AgentPhase::Running));

        assert_eq!(snapshot.current_round, 0);
        assert_eq!(snapshot.agent(Role::Auditor).unwrap().phase, AgentPhase::Idle);
        assert!(store.get_state().version > snapshot.version);
    }

    #[test]
    fn test_subscribe_receives_events_in_order_until_unsubscribed() {
        let dir = tempdir().unwrap();
        let store = RunStore::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = store.subscribe(move |e| sink.lock().unwrap().push(e.id));

        start(&store, dir.path());
        store
            .append_event(NewEvent::new(EventKind::RoundStarted, "r1"))
            .unwrap();
        sub.unsubscribe();
        store
            .append_event(NewEvent::new(EventKind::RoundFinished, "r1"))
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_listener_can_read_state() {
        let dir = tempdir().unwrap();
        let store = Arc::new(RunStore::default());
        let observed = Arc::new(Mutex::new(None));
        let (reader, sink) = (Arc::clone(&store), Arc::clone(&observed));
        let _sub = store.subscribe(move |_| {
            *sink.lock().unwrap() = Some(reader.get_state().events.len());
        });
        start(&store, dir.path());
        assert_eq!(*observed.lock().unwrap(), Some(1));
    }

    #[test]
    fn test_finish_run_forces_active_agents_terminal() {
        let dir = tempdir().unwrap();
        let store = RunStore::default();
        start(&store, dir.path());
        store.reset_agents_for_round(1);
        store.set_agent_state(Role::Evaluator, AgentPatch::phase(AgentPhase::Running));

        store.finish_run("done").unwrap();

        let state = store.get_state();
        assert!(!state.running);
        assert!(state.ended_at.is_some());
        assert_eq!(state.outcome.as_deref(), Some("done"));
        assert!(
            state
                .agents
                .values()
                .all(|a| a.phase == AgentPhase::Completed)
        );
        assert_eq!(state.events.back().unwrap().kind, EventKind::RunFinished);
    }

    #[test]
    fn test_fail_run_records_error() {
        let dir = tempdir().unwrap();
        let store = RunStore::default();
        start(&store, dir.path());
        store.set_agent_state(Role::Coordinator, AgentPatch::phase(AgentPhase::Running));

        store.fail_run("boom").unwrap();

        let state = store.get_state();
        assert_eq!(state.errors, vec!["boom".to_string()]);
        assert_eq!(
            state.agent(Role::Coordinator).unwrap().phase,
            AgentPhase::Failed
        );
        let last = state.events.back().unwrap();
        assert_eq!(last.kind, EventKind::RunFailed);
        assert_eq!(last.severity, Some(Severity::Error));
    }

    #[test]
    fn test_start_after_finish_resets_run_data() {
        let dir = tempdir().unwrap();
        let store = RunStore::default();
        let first = start(&store, dir.path());
        store.upsert_round(RoundSummary::running(1));
        store.finish_run("done").unwrap();

        let second = start(&store, dir.path());
        assert_ne!(first.run_id, second.run_id);
        let state = store.get_state();
        assert!(state.rounds.is_empty());
        assert_eq!(state.events.len(), 1);
        // ids keep increasing across runs
        assert!(state.events[0].id > 2);
    }

    #[test]
    fn test_upsert_round_replaces_by_number() {
        let dir = tempdir().unwrap();
        let store = RunStore::default();
        start(&store, dir.path());
        store.upsert_round(RoundSummary::running(1));
        let mut done = RoundSummary::running(1);
        done.verdict = RoundVerdict::Revise;
        store.upsert_round(done);

        let state = store.get_state();
        assert_eq!(state.rounds.len(), 1);
        assert_eq!(state.round(1).unwrap().verdict, RoundVerdict::Revise);
    }

    #[test]
    fn test_append_message_is_bounded_and_persisted() {
        let dir = tempdir().unwrap();
        let store = RunStore::new(StoreConfig { event_cap: 2 });
        let desc = start(&store, dir.path());

        for i in 0..6 {
            store.append_message(AgentMessage::new(
                1,
                Endpoint::System,
                Endpoint::Broadcast,
                MessageKind::Control,
                format!("m{i}"),
            ));
        }

        let state = store.get_state();
        assert_eq!(state.messages.len(), 4);
        assert_eq!(state.messages.front().unwrap().summary, "m2");

        let persisted = MessageLog::new(&desc.run_dir).read_round(1).unwrap();
        assert_eq!(persisted.len(), 6);
    }

    #[test]
    fn test_toggle_pause_requires_active_run_and_change() {
        let dir = tempdir().unwrap();
        let store = RunStore::default();
        assert!(!store.toggle_pause(true, None));

        start(&store, dir.path());
        assert!(store.toggle_pause(true, Some("operator".into())));
        assert!(!store.toggle_pause(true, None));
        assert_eq!(store.get_state().pause_reason.as_deref(), Some("operator"));
        assert!(store.run_flags().paused);

        assert!(store.toggle_pause(false, None));
        assert_eq!(store.get_state().pause_reason, None);
    }

    #[test]
    fn test_take_pending_approval_clears_once() {
        let dir = tempdir().unwrap();
        let store = RunStore::default();
        start(&store, dir.path());
        store.set_pending_approval(Some(PendingApproval {
            id: "a1".into(),
            round: 1,
            agent: Role::Implementer,
            gate: "implementer-act".into(),
            requested_at: Utc::now(),
        }));
        assert_eq!(store.run_flags().pending_approval.as_deref(), Some("a1"));

        assert_eq!(store.take_pending_approval().map(|p| p.id), Some("a1".into()));
        assert!(store.take_pending_approval().is_none());
        assert_eq!(store.run_flags().pending_approval, None);
    }
}
