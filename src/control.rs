use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::ImgenError;
use crate::request::RequestSpec;

/// How long a regenerate control stays usable after it is attached.
pub const DEFAULT_CONTROL_TTL: Duration = Duration::from_secs(60);

/// How often idle controls are checked for expiry.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ControlId(u64);

impl fmt::Display for ControlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctl-{}", self.0)
    }
}

impl FromStr for ControlId {
    type Err = ImgenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .strip_prefix("ctl-")
            .and_then(|n| n.parse().ok())
            .map(ControlId)
            .ok_or_else(|| ImgenError::ControlNotFound(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    Enabled,
    Disabled,
}

/// State changes pushed to whatever renders the controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    Attached(ControlId),
    Disabled(ControlId),
    Enabled(ControlId),
    Expired(ControlId),
}

impl ControlEvent {
    pub fn id(&self) -> ControlId {
        match self {
            Self::Attached(id) | Self::Disabled(id) | Self::Enabled(id) | Self::Expired(id) => *id,
        }
    }
}

/// Presentation layer for controls. `apply` is called synchronously, in
/// order, while the board is locked; implementations must not call back
/// into the board.
pub trait ControlSurface: Send + Sync {
    fn apply(&self, event: &ControlEvent);
}

/// Surface that only logs.
pub struct TracingSurface;

impl ControlSurface for TracingSurface {
    fn apply(&self, event: &ControlEvent) {
        tracing::debug!(control = %event.id(), ?event, "control event");
    }
}

/// A "regenerate" button bound to one immutable request.
#[derive(Debug, Clone)]
pub struct RegenerateControl {
    pub id: ControlId,
    pub author: String,
    pub spec: Arc<RequestSpec>,
    state: ControlState,
    expires_at: Instant,
}

impl RegenerateControl {
    pub fn state(&self) -> ControlState {
        self.state
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Enabled → Disabled for the author. The returned event must reach the
    /// surface before any pipeline work starts.
    fn activate(&mut self, user: &str) -> Result<ControlEvent, ImgenError> {
        if user != self.author {
            return Err(ImgenError::NotAuthorized {
                control: self.id.to_string(),
                user: user.to_string(),
            });
        }
        match self.state {
            ControlState::Disabled => Err(ImgenError::ControlDisabled(self.id.to_string())),
            ControlState::Enabled => {
                self.state = ControlState::Disabled;
                Ok(ControlEvent::Disabled(self.id))
            }
        }
    }
}

/// Owns every live control and routes activations to them.
pub struct ControlBoard {
    controls: Mutex<HashMap<ControlId, RegenerateControl>>,
    next_id: AtomicU64,
    ttl: Duration,
    surface: Arc<dyn ControlSurface>,
}

impl ControlBoard {
    pub fn new(ttl: Duration, surface: Arc<dyn ControlSurface>) -> Self {
        Self {
            controls: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            ttl,
            surface,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ControlId, RegenerateControl>> {
        self.controls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach a fresh, enabled control for `author`.
    pub fn attach(&self, author: &str, spec: Arc<RequestSpec>) -> ControlId {
        let id = ControlId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut controls = self.lock();
        self.sweep_locked(&mut controls);
        controls.insert(
            id,
            RegenerateControl {
                id,
                author: author.to_string(),
                spec,
                state: ControlState::Enabled,
                expires_at: Instant::now() + self.ttl,
            },
        );
        self.surface.apply(&ControlEvent::Attached(id));
        id
    }

    /// Disable the control and hand back its request. A second activation
    /// of the same control fails with `ControlDisabled`.
    pub fn activate(&self, id: ControlId, user: &str) -> Result<Arc<RequestSpec>, ImgenError> {
        let mut controls = self.lock();
        let control = controls
            .get_mut(&id)
            .ok_or_else(|| ImgenError::ControlNotFound(id.to_string()))?;

        if control.is_expired(Instant::now()) {
            controls.remove(&id);
            self.surface.apply(&ControlEvent::Expired(id));
            return Err(ImgenError::ControlExpired(id.to_string()));
        }

        let event = control.activate(user)?;
        let spec = control.spec.clone();
        self.surface.apply(&event);
        Ok(spec)
    }

    /// Re-enable a control whose activation never reached the pipeline.
    pub fn restore(&self, id: ControlId) {
        let mut controls = self.lock();
        if let Some(control) = controls.get_mut(&id)
            && control.state == ControlState::Disabled
        {
            control.state = ControlState::Enabled;
            self.surface.apply(&ControlEvent::Enabled(id));
        }
    }

    pub fn state(&self, id: ControlId) -> Option<ControlState> {
        self.lock().get(&id).map(|c| c.state)
    }

    pub fn get(&self, id: ControlId) -> Option<RegenerateControl> {
        self.lock().get(&id).cloned()
    }

    /// Drop expired controls; returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let mut controls = self.lock();
        self.sweep_locked(&mut controls)
    }

    /// Expire idle controls every `period` so the surface hears about them
    /// without waiting for the next attach or activation. The task holds a
    /// weak reference and ends once the board is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let board = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(board) = board.upgrade() else {
                    break;
                };
                let swept = board.sweep_expired();
                if swept > 0 {
                    tracing::debug!(swept, "expired idle controls");
                }
            }
        })
    }

    fn sweep_locked(&self, controls: &mut HashMap<ControlId, RegenerateControl>) -> usize {
        let now = Instant::now();
        let mut expired: Vec<ControlId> = controls
            .values()
            .filter(|c| c.is_expired(now))
            .map(|c| c.id)
            .collect();
        expired.sort();
        for id in &expired {
            controls.remove(id);
            self.surface.apply(&ControlEvent::Expired(*id));
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
