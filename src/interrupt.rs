//! Interrupt controller: cancellation tokens for in-flight turns
//!
//! At most one token is armed per session. Arm and clear both
//! compare-and-set against the armed turn id, so an interrupt can never
//! act on a stale token and a late clear from a replaced turn cannot
//! drop a newer one.

use crate::{ConfabError, Result, SessionId, TurnId};
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct ArmedTurn {
    turn_id: TurnId,
    token: CancellationToken,
}

#[derive(Default)]
pub struct InterruptController {
    armed: Mutex<HashMap<SessionId, ArmedTurn>>,
}

impl InterruptController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a fresh token for the turn. Fails if the session already has
    /// an armed token: the previous turn has not reached a terminal
    /// outcome yet.
    pub fn arm(&self, session_id: SessionId, turn_id: TurnId) -> Result<CancellationToken> {
        let mut armed = self.armed.lock();
        if armed.contains_key(&session_id) {
            return Err(ConfabError::InvalidState(
                "a turn is already in progress".to_string(),
            ));
        }
        let token = CancellationToken::new();
        armed.insert(
            session_id,
            ArmedTurn {
                turn_id,
                token: token.clone(),
            },
        );
        debug!(%session_id, %turn_id, "armed cancellation token");
        Ok(token)
    }

    /// Cancel the armed token, if any. Safe no-op otherwise. Returns
    /// whether a turn was actually signalled.
    pub fn cancel(&self, session_id: SessionId) -> bool {
        let armed = self.armed.lock();
        match armed.get(&session_id) {
            Some(entry) => {
                entry.token.cancel();
                debug!(%session_id, turn_id = %entry.turn_id, "cancelled in-flight turn");
                true
            }
            None => false,
        }
    }

    /// Disarm on turn completion. Only removes the entry if it still
    /// belongs to the given turn.
    pub fn clear(&self, session_id: SessionId, turn_id: TurnId) -> bool {
        let mut armed = self.armed.lock();
        match armed.get(&session_id) {
            Some(entry) if entry.turn_id == turn_id => {
                armed.remove(&session_id);
                true
            }
            _ => false,
        }
    }

    pub fn is_armed(&self, session_id: SessionId) -> bool {
        self.armed.lock().contains_key(&session_id)
    }
}
