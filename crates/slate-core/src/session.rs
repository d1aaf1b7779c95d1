//! Session backend registry
//!
//! A prepared session keeps a few idle, already-started interpreters so its
//! executions skip interpreter startup. Each idle unit still runs exactly one
//! job: checking one out hands it to the caller and starts a replacement.

use crate::config::EngineConfig;
use crate::request::SessionId;
use crate::sandbox::{SandboxUnit, Spawner};
use crate::Result;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Lifecycle of one session's backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendState {
    Uninitialized,
    Preparing,
    Ready,
    /// Terminal; a later prepare creates a new backend under the same id
    TornDown,
}

/// Warm units owned by one session
#[derive(Debug, Default)]
struct SessionBackend {
    idle: VecDeque<SandboxUnit>,
}

impl SessionBackend {
    /// Pop the first unit that is still alive, reaping dead ones
    async fn take_live(&mut self, session: &SessionId) -> Option<SandboxUnit> {
        while let Some(mut unit) = self.idle.pop_front() {
            if !unit.has_exited() {
                return Some(unit);
            }
            tracing::warn!(%session, unit_id = unit.id, "discarding dead warm unit");
            unit.terminate().await;
        }
        None
    }

    async fn shutdown(self) {
        for unit in self.idle {
            unit.terminate().await;
        }
    }
}

#[derive(Debug)]
struct SessionSlot {
    /// Mirror of the lifecycle, readable without awaiting `backend`
    state: Mutex<BackendState>,
    /// Held across prepare, checkout and cleanup of this session only
    backend: tokio::sync::Mutex<Option<SessionBackend>>,
}

impl SessionSlot {
    fn new() -> Self {
        Self {
            state: Mutex::new(BackendState::Uninitialized),
            backend: tokio::sync::Mutex::new(None),
        }
    }

    fn state(&self) -> BackendState {
        *self.state.lock()
    }

    fn set_state(&self, state: BackendState) {
        *self.state.lock() = state;
    }
}

pub struct SessionRegistry {
    slots: Mutex<HashMap<SessionId, Arc<SessionSlot>>>,
    spawner: Arc<dyn Spawner>,
    config: Arc<EngineConfig>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(spawner: Arc<dyn Spawner>, config: Arc<EngineConfig>) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            spawner,
            config,
        }
    }

    /// Warm a backend for `session`
    ///
    /// A no-op when the backend is already ready. Failures are logged and
    /// drop the session's entry, as if it had never been prepared; its
    /// executions then start cold.
    pub async fn prepare(&self, session: &SessionId) {
        loop {
            let slot = self.slot_or_insert(session);
            let mut backend = slot.backend.lock().await;
            match slot.state() {
                // Cleanup won the race and dropped this slot from the map.
                BackendState::TornDown => continue,
                BackendState::Ready => return,
                BackendState::Uninitialized | BackendState::Preparing => {}
            }

            slot.set_state(BackendState::Preparing);
            tracing::debug!(%session, "preparing session backend");
            match self.warm_up().await {
                Ok(warm) => {
                    tracing::info!(%session, units = warm.idle.len(), "session backend ready");
                    *backend = Some(warm);
                    slot.set_state(BackendState::Ready);
                }
                Err(e) => {
                    tracing::warn!(%session, error = %e, "session preparation failed; executions will start cold");
                    // Waiters queued on this slot see it as gone and start over.
                    slot.set_state(BackendState::TornDown);
                    self.forget(session, &slot);
                }
            }
            return;
        }
    }

    /// Take a warm unit for one execution, starting a replacement
    ///
    /// `None` when the session has no ready backend or no live unit left.
    pub async fn checkout(&self, session: &SessionId) -> Option<SandboxUnit> {
        let slot = self.slots.lock().get(session).cloned()?;
        let mut guard = slot.backend.lock().await;
        let backend = guard.as_mut()?;

        let unit = backend.take_live(session).await;
        match self.spawner.spawn(&self.config.sandbox) {
            Ok(fresh) => backend.idle.push_back(fresh),
            Err(e) => tracing::warn!(%session, error = %e, "failed to replenish warm unit"),
        }
        if let Some(unit) = &unit {
            tracing::debug!(%session, unit_id = unit.id, "warm unit checked out");
        }
        unit
    }

    /// Tear down the session's backend; unknown sessions are ignored
    pub async fn cleanup(&self, session: &SessionId) {
        let Some(slot) = self.slots.lock().remove(session) else {
            return;
        };
        let mut backend = slot.backend.lock().await;
        slot.set_state(BackendState::TornDown);
        if let Some(warm) = backend.take() {
            warm.shutdown().await;
        }
        tracing::info!(%session, "session backend torn down");
    }

    /// Tear down every session
    pub async fn cleanup_all(&self) {
        for session in self.active_sessions() {
            self.cleanup(&session).await;
        }
    }

    /// `None` for sessions that were never prepared or have been cleaned up
    #[must_use]
    pub fn state(&self, session: &SessionId) -> Option<BackendState> {
        self.slots.lock().get(session).map(|slot| slot.state())
    }

    /// Sessions with a registry entry, sorted
    #[must_use]
    pub fn active_sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.slots.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Drop `slot` from the map unless a newer slot already replaced it
    fn forget(&self, session: &SessionId, slot: &Arc<SessionSlot>) {
        let mut slots = self.slots.lock();
        if slots.get(session).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            slots.remove(session);
        }
    }

    fn slot_or_insert(&self, session: &SessionId) -> Arc<SessionSlot> {
        Arc::clone(
            self.slots
                .lock()
                .entry(session.clone())
                .or_insert_with(|| Arc::new(SessionSlot::new())),
        )
    }

    async fn warm_up(&self) -> Result<SessionBackend> {
        let sandbox = &self.config.sandbox;
        let mut warm = SessionBackend::default();
        for _ in 0..self.config.sessions.warm_units {
            let started = match self.spawner.spawn(sandbox) {
                Ok(mut unit) => unit.await_ready(sandbox.startup_timeout).await.map(|()| unit),
                Err(e) => Err(e),
            };
            match started {
                Ok(unit) => warm.idle.push_back(unit),
                Err(e) => {
                    warm.shutdown().await;
                    return Err(e);
                }
            }
        }
        Ok(warm)
    }
}
