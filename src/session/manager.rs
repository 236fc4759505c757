//! Session manager: per-conversation state machines and the external API
//!
//! Sole entry point for commands from the presentation layer. Sessions
//! live in a session-keyed table; each one owns its state cell, event
//! channel, and active-turn slot. Turns within a session are strictly
//! serialized: a new turn starts only after the previous one reached a
//! terminal outcome.

use crate::config::ConfabConfig;
use crate::gateway::Gateways;
use crate::history::{HistoryStore, TurnLog, TurnStatus};
use crate::interrupt::InterruptController;
use crate::pipeline::{InputPayload, PipelineCoordinator, PipelineRequest, PipelineResult, TurnContext};
use crate::profile::{PersonalityProfile, ProfileStore};
use crate::session::events::SessionEvent;
use crate::session::state::SessionState;
use crate::{ConfabError, Result, SessionId, TurnId};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

struct ActiveTurn {
    turn_id: TurnId,
    handle: JoinHandle<PipelineResult>,
}

/// Everything one session owns
struct SessionCell {
    id: SessionId,
    profile: PersonalityProfile,
    continuous: bool,
    created_at: DateTime<Utc>,
    state: Arc<Mutex<SessionState>>,
    events: broadcast::Sender<SessionEvent>,
    last_activity: Mutex<DateTime<Utc>>,
    /// Serializes turn starts per session; holds the in-flight turn
    active_turn: tokio::sync::Mutex<Option<ActiveTurn>>,
    next_ordinal: AtomicU64,
}

impl SessionCell {
    fn ctx(&self) -> TurnContext {
        TurnContext::new(Arc::clone(&self.state), self.events.clone(), self.continuous)
    }

    fn touch(&self) {
        *self.last_activity.lock() = Utc::now();
    }
}

pub struct SessionManager {
    config: ConfabConfig,
    profiles: Arc<dyn ProfileStore>,
    history: Arc<HistoryStore>,
    interrupts: Arc<InterruptController>,
    coordinator: Arc<PipelineCoordinator>,
    sessions: RwLock<HashMap<SessionId, Arc<SessionCell>>>,
}

impl SessionManager {
    pub fn new(
        config: ConfabConfig,
        gateways: Gateways,
        profiles: Arc<dyn ProfileStore>,
        log: Arc<dyn TurnLog>,
    ) -> Result<Self> {
        config.validate().map_err(ConfabError::ConfigError)?;
        let history = Arc::new(HistoryStore::new(log, config.history.clone()));
        let coordinator = Arc::new(PipelineCoordinator::new(
            gateways,
            Arc::clone(&history),
            config.clone(),
        ));
        Ok(Self {
            config,
            profiles,
            history,
            interrupts: Arc::new(InterruptController::new()),
            coordinator,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    /// Create a session bound to a personality profile. Fails with
    /// `ProfileNotFound` before any session state is created. The
    /// session starts at rest: Idle, or Listening in continuous mode.
    pub async fn start_session(&self, profile_id: &str, continuous: bool) -> Result<SessionId> {
        let profile = self
            .profiles
            .fetch(profile_id)
            .await
            .ok_or_else(|| ConfabError::ProfileNotFound(profile_id.to_string()))?;

        let id = Uuid::new_v4();
        let (events, _) = broadcast::channel(self.config.session.event_capacity);
        let now = Utc::now();
        let cell = Arc::new(SessionCell {
            id,
            profile,
            continuous,
            created_at: now,
            state: Arc::new(Mutex::new(SessionState::resting(continuous))),
            events,
            last_activity: Mutex::new(now),
            active_turn: tokio::sync::Mutex::new(None),
            next_ordinal: AtomicU64::new(0),
        });
        self.sessions.write().insert(id, cell);
        info!(session_id = %id, %profile_id, continuous, "session started");
        Ok(id)
    }

    /// Start a turn for the given input. From a resting state this
    /// begins the pipeline immediately; with a turn in flight, the call
    /// is rejected unless continuous mode turns it into a barge-in
    /// (interrupt the current turn, then start the new one).
    pub async fn submit_input(&self, session_id: SessionId, input: InputPayload) -> Result<TurnId> {
        let cell = self.cell(session_id)?;
        cell.touch();

        let mut active = cell.active_turn.lock().await;
        if let Some(prev) = active.take() {
            if prev.handle.is_finished() {
                let _ = prev.handle.await;
            } else if cell.continuous {
                debug!(session_id = %cell.id, turn_id = %prev.turn_id, "barge-in: replacing in-flight turn");
                self.interrupts.cancel(session_id);
                let _ = prev.handle.await;
            } else {
                let turn_id = prev.turn_id;
                *active = Some(prev);
                return Err(ConfabError::InvalidState(format!(
                    "turn {turn_id} is still in progress"
                )));
            }
        }

        let state = *cell.state.lock();
        if !state.can_accept_input() {
            return Err(ConfabError::InvalidState(format!(
                "cannot accept input in state {state}"
            )));
        }

        let turn_id = Uuid::new_v4();
        let cancel = self.interrupts.arm(session_id, turn_id)?;
        let ordinal = cell.next_ordinal.fetch_add(1, Ordering::SeqCst);
        let request = PipelineRequest {
            session_id,
            turn_id,
            ordinal,
            input,
            profile: cell.profile.clone(),
            language_hint: None,
            cancel,
        };

        let ctx = cell.ctx();
        let coordinator = Arc::clone(&self.coordinator);
        let interrupts = Arc::clone(&self.interrupts);
        let handle = tokio::spawn(async move {
            let result = coordinator.run_turn(request, &ctx).await;
            interrupts.clear(session_id, turn_id);

            // Cancellation always resolves through the Interrupted hop
            // before the session settles back to rest.
            if result.turn.status == TurnStatus::Interrupted {
                ctx.transition(SessionState::Interrupted);
            }
            if !ctx.state().is_terminal() {
                ctx.transition(SessionState::resting(ctx.continuous));
            }
            result
        });
        *active = Some(ActiveTurn { turn_id, handle });
        Ok(turn_id)
    }

    /// Cancel the in-flight turn, if any. Idempotent: interrupting a
    /// session at rest is a no-op. Returns once the turn has reached
    /// its terminal outcome and the session is back at rest.
    pub async fn interrupt(&self, session_id: SessionId) -> Result<()> {
        let cell = self.cell(session_id)?;
        cell.touch();

        let mut active = cell.active_turn.lock().await;
        if let Some(prev) = active.take() {
            self.interrupts.cancel(session_id);
            let _ = prev.handle.await;
        }
        Ok(())
    }

    /// Cancel any in-flight turn, release per-session resources, and
    /// transition to the terminal `Closed` state. The persisted turn
    /// log is kept; only the in-memory window is dropped.
    pub async fn close_session(&self, session_id: SessionId) -> Result<()> {
        let cell = self
            .sessions
            .write()
            .remove(&session_id)
            .ok_or(ConfabError::SessionNotFound(session_id))?;

        self.interrupts.cancel(session_id);
        let mut active = cell.active_turn.lock().await;
        if let Some(prev) = active.take() {
            let _ = prev.handle.await;
        }

        let ctx = cell.ctx();
        ctx.transition(SessionState::Closed);
        ctx.emit(SessionEvent::Closed);
        self.history.close(session_id);
        info!(%session_id, "session closed");
        Ok(())
    }

    /// Subscribe to state-change and output events for a session
    pub fn subscribe(&self, session_id: SessionId) -> Result<broadcast::Receiver<SessionEvent>> {
        Ok(self.cell(session_id)?.events.subscribe())
    }

    pub fn session_state(&self, session_id: SessionId) -> Result<SessionState> {
        Ok(*self.cell(session_id)?.state.lock())
    }

    /// Age of the session since its last command
    pub fn idle_for(&self, session_id: SessionId) -> Result<std::time::Duration> {
        let cell = self.cell(session_id)?;
        let last = *cell.last_activity.lock();
        Ok(Utc::now()
            .signed_duration_since(last)
            .to_std()
            .unwrap_or_default())
    }

    /// Close sessions idle past the configured timeout. Returns the
    /// number of sessions evicted.
    pub async fn evict_idle(&self) -> usize {
        let timeout = self.config.session.idle_timeout;
        let now = Utc::now();
        let stale: Vec<SessionId> = self
            .sessions
            .read()
            .iter()
            .filter(|(_, cell)| {
                now.signed_duration_since(*cell.last_activity.lock())
                    .to_std()
                    .map(|idle| idle > timeout)
                    .unwrap_or(false)
            })
            .map(|(id, _)| *id)
            .collect();

        let mut evicted = 0;
        for session_id in stale {
            match self.close_session(session_id).await {
                Ok(()) => {
                    warn!(%session_id, "evicted idle session");
                    evicted += 1;
                }
                Err(ConfabError::SessionNotFound(_)) => {}
                Err(err) => warn!(%session_id, "idle eviction failed: {err}"),
            }
        }
        evicted
    }

    /// Shared history store, mainly for inspection by the surrounding
    /// system (audit views, tests).
    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn created_at(&self, session_id: SessionId) -> Result<DateTime<Utc>> {
        Ok(self.cell(session_id)?.created_at)
    }

    fn cell(&self, session_id: SessionId) -> Result<Arc<SessionCell>> {
        self.sessions
            .read()
            .get(&session_id)
            .cloned()
            .ok_or(ConfabError::SessionNotFound(session_id))
    }
}
