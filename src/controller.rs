//! Run control surface.
//!
//! `RunController` owns the store handle and the background orchestrator
//! task. Callers start a run, steer it while it is in flight, and rewind
//! the workspace between runs or while paused.

use crate::agent::augment::{HttpAugmenter, ResearchAugmenter};
use crate::agent::{AgentExecutor, DemoExecutor, ProcessExecutor};
use crate::checkpoint::CheckpointStore;
use crate::config::Settings;
use crate::errors::ControlError;
use crate::orchestrator::RoundOrchestrator;
use crate::state::{EventKind, ExecutionMode, Feature, NewEvent, RunDescriptor, RunOptions, RunStore};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

pub struct RunController {
    store: Arc<RunStore>,
    settings: Settings,
    executor: Option<Arc<dyn AgentExecutor>>,
    augmenter: Option<Arc<dyn ResearchAugmenter>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RunController {
    pub fn new(store: Arc<RunStore>, settings: Settings) -> Self {
        Self {
            store,
            settings,
            executor: None,
            augmenter: None,
            task: Mutex::new(None),
        }
    }

    /// Use this executor for every turn regardless of mode.
    pub fn with_executor(mut self, executor: Arc<dyn AgentExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_augmenter(mut self, augmenter: Arc<dyn ResearchAugmenter>) -> Self {
        self.augmenter = Some(augmenter);
        self
    }

    pub fn store(&self) -> &Arc<RunStore> {
        &self.store
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Start a run in the background. Fails without touching state when a
    /// run is already active or a tracked target escapes the workspace.
    pub fn start(&self, mut options: RunOptions) -> Result<RunDescriptor, ControlError> {
        options.mode = self.settings.effective_mode(Some(options.mode));
        self.settings.tracked_paths().validate()?;
        let descriptor = self.store.start_run(options)?;
        tracing::info!(
            run_id = %descriptor.run_id,
            mode = %descriptor.mode,
            workspace = %descriptor.workspace.display(),
            "Run started"
        );

        let orchestrator = RoundOrchestrator::new(
            self.store.clone(),
            self.executor_for(descriptor.mode),
            &descriptor,
            &self.settings,
        )
        .with_augmenter(self.augmenter_for(&descriptor));

        let store = self.store.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = orchestrator.run().await {
                tracing::error!("Run aborted: {}", e);
                // A stop request already ended the run; don't report it twice.
                if store.run_flags().running
                    && let Err(fail_err) = store.fail_run(e.to_string())
                {
                    tracing::warn!("Could not record run failure: {}", fail_err);
                }
            }
        });

        let previous = self.lock_task().replace(handle);
        if let Some(previous) = previous
            && !previous.is_finished()
        {
            tracing::warn!("Replaced the handle of a run task that is still running");
        }
        Ok(descriptor)
    }

    fn executor_for(&self, mode: ExecutionMode) -> Arc<dyn AgentExecutor> {
        if let Some(executor) = &self.executor {
            return executor.clone();
        }
        match mode {
            ExecutionMode::Demo => {
                let (min, max) = self.settings.demo_latency();
                Arc::new(DemoExecutor::new(min, max))
            }
            ExecutionMode::Local => Arc::new(ProcessExecutor::new(
                self.settings.agent.command.clone(),
                self.settings.agent.args.clone(),
                self.settings.agent_timeout(),
            )),
        }
    }

    fn augmenter_for(&self, descriptor: &RunDescriptor) -> Option<Arc<dyn ResearchAugmenter>> {
        if !descriptor.features.contains(&Feature::Research) {
            return None;
        }
        if let Some(augmenter) = &self.augmenter {
            return Some(augmenter.clone());
        }
        if !self.settings.research.augment {
            return None;
        }
        let endpoint = self.settings.research.endpoint.as_deref()?;
        match HttpAugmenter::new(endpoint, self.settings.research.api_key.clone()) {
            Ok(augmenter) => Some(Arc::new(augmenter)),
            Err(e) => {
                tracing::warn!("Research augmentation disabled: {:#}", e);
                None
            }
        }
    }

    /// Pause at the next gate. Returns false when nothing changed.
    pub fn pause(&self, reason: Option<String>) -> bool {
        let message = reason
            .clone()
            .unwrap_or_else(|| "Paused by operator".to_string());
        if !self.store.toggle_pause(true, reason) {
            return false;
        }
        self.emit(NewEvent::new(EventKind::RunPaused, message));
        true
    }

    pub fn resume(&self) -> bool {
        if !self.store.toggle_pause(false, None) {
            return false;
        }
        self.emit(NewEvent::new(EventKind::RunResumed, "Run resumed"));
        true
    }

    /// Clear the pending approval, letting the waiting turn proceed.
    pub fn approve_pending(&self) -> bool {
        let Some(pending) = self.store.take_pending_approval() else {
            return false;
        };
        self.emit(
            NewEvent::new(
                EventKind::Approved,
                format!("Approved {} at gate {}", pending.agent, pending.gate),
            )
            .round(pending.round)
            .agent(pending.agent)
            .metadata(serde_json::json!({ "id": pending.id, "gate": pending.gate })),
        );
        true
    }

    /// Restore the workspace to a round's checkpoint. Only allowed when no
    /// run is active or the active run is paused.
    pub fn rewind(&self, round: u32) -> Result<usize, ControlError> {
        let flags = self.store.run_flags();
        if flags.running && !flags.paused {
            return Err(ControlError::RewindWhileActive);
        }
        let state = self.store.get_state();
        let workspace = state.workspace.ok_or(ControlError::WorkspaceUnset)?;

        let checkpoints = CheckpointStore::for_workspace(&workspace, self.settings.tracked_paths());
        let restored = checkpoints.restore(round, &workspace)?;
        tracing::info!(round, restored, "Workspace rewound");

        self.store.append_event(
            NewEvent::new(
                EventKind::Rewind,
                format!("Rewound workspace to the round {} checkpoint", round),
            )
            .round(state.current_round)
            .metadata(serde_json::json!({
                "target_round": round,
                "restored": restored,
                "automatic": false,
            })),
        )?;
        Ok(restored)
    }

    /// Wait for the background run task, if any.
    pub async fn wait(&self) {
        let handle = self.lock_task().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            tracing::error!("Run task panicked: {}", e);
            if self.store.run_flags().running {
                self.store.fail_run(format!("Run task panicked: {}", e)).ok();
            }
        }
    }

    fn emit(&self, event: NewEvent) {
        let round = self.store.get_state().current_round;
        let event = if event.round.is_none() {
            event.round(round)
        } else {
            event
        };
        if let Err(e) = self.store.append_event(event) {
            tracing::warn!("Dropped control event: {}", e);
        }
    }

    fn lock_task(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
