use std::collections::HashMap;
use std::time::Duration;

use huddle_protocol::{PeerId, ReconnectConfig};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::events::{EventHub, SessionEvent};

/// Delayed instruction to restart ICE for a peer. Fired by the supervisor's
/// timers and consumed by the session pump, which re-checks the link state
/// before acting.
#[derive(Debug)]
pub(crate) struct RestartOrder {
    pub peer_id: PeerId,
    pub attempt: u32,
}

struct AttemptState {
    attempts: u32,
    exhausted: bool,
    timer: Option<JoinHandle<()>>,
}

/// Schedules bounded, exponentially backed off ICE restarts for peers that
/// drop out of connected.
pub struct ReconnectSupervisor {
    cfg: ReconnectConfig,
    states: Mutex<HashMap<PeerId, AttemptState>>,
    events: EventHub,
    restart_tx: mpsc::UnboundedSender<RestartOrder>,
}

/// Delay before attempt `attempt` (1-based): base doubled per prior attempt,
/// clamped to the cap.
pub fn backoff_delay(attempt: u32, base_delay_ms: u64, max_delay_ms: u64) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let delay = base_delay_ms.saturating_mul(1u64 << exp).min(max_delay_ms);
    Duration::from_millis(delay)
}

impl ReconnectSupervisor {
    pub(crate) fn new(
        cfg: ReconnectConfig,
        events: EventHub,
        restart_tx: mpsc::UnboundedSender<RestartOrder>,
    ) -> Self {
        Self { cfg, states: Mutex::new(HashMap::new()), events, restart_tx }
    }

    /// A peer dropped to disconnected or failed. Schedules the next restart
    /// attempt unless one is already pending or the budget is spent.
    pub async fn note_failure(&self, peer_id: &PeerId) {
        let mut states = self.states.lock().await;
        let entry = states
            .entry(peer_id.clone())
            .or_insert(AttemptState { attempts: 0, exhausted: false, timer: None });

        if entry.exhausted {
            debug!(peer = %peer_id, "Reconnection budget already spent");
            return;
        }
        if let Some(timer) = &entry.timer {
            if !timer.is_finished() {
                debug!(peer = %peer_id, "Reconnection attempt already scheduled");
                return;
            }
        }
        if entry.attempts >= self.cfg.max_attempts {
            // Stays down until negotiation is triggered again from outside;
            // the entry is kept so later failures of the same dead link do
            // not restart the budget.
            entry.exhausted = true;
            warn!(peer = %peer_id, attempts = entry.attempts, "Reconnection attempts exhausted");
            self.events.emit(SessionEvent::ReconnectExhausted { peer_id: peer_id.clone() });
            return;
        }

        entry.attempts += 1;
        let attempt = entry.attempts;
        let delay = backoff_delay(attempt, self.cfg.base_delay_ms, self.cfg.max_delay_ms);
        info!(
            peer = %peer_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Scheduling ICE restart"
        );
        self.events.emit(SessionEvent::ReconnectAttempt { peer_id: peer_id.clone(), attempt });

        let tx = self.restart_tx.clone();
        let id = peer_id.clone();
        entry.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(RestartOrder { peer_id: id, attempt });
        }));
    }

    /// The peer reached connected again: the attempt counter resets so a
    /// future outage starts from the shortest delay.
    pub async fn note_connected(&self, peer_id: &PeerId) {
        if self.remove(peer_id).await {
            debug!(peer = %peer_id, "Reconnection state reset after recovery");
        }
    }

    /// Drop any pending attempt for a peer being deliberately closed.
    pub async fn clear(&self, peer_id: &PeerId) {
        if self.remove(peer_id).await {
            debug!(peer = %peer_id, "Pending reconnection cancelled");
        }
    }

    pub async fn clear_all(&self) {
        let mut states = self.states.lock().await;
        for (_, state) in states.drain() {
            if let Some(timer) = state.timer {
                timer.abort();
            }
        }
    }

    async fn remove(&self, peer_id: &PeerId) -> bool {
        match self.states.lock().await.remove(peer_id) {
            Some(state) => {
                if let Some(timer) = state.timer {
                    timer.abort();
                }
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub(crate) async fn tracked(&self) -> usize {
        self.states.lock().await.len()
    }
}
