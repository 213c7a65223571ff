//! Alert/cooldown state machine.
//!
//! Consumes one detection decision per analysed block and reports which
//! notifications must be emitted. The machine is the only owner of the alert
//! state and of the last transition timestamp.

use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Alert state as exposed to notifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertState {
    /// No sustained tone
    Quiet,

    /// Tone detected, notifications suppressed until the cooldown elapses
    Alerting,
}

/// Notifications produced by a single step, in emission order.
///
/// A step emits at most two: `false` when a cooldown closes out an alert and
/// `true` when a detection is reported in the same block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Notifications {
    events: [bool; 2],
    len: usize,
}

impl Notifications {
    fn push(&mut self, state: bool) {
        self.events[self.len] = state;
        self.len += 1;
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.events[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        self.as_slice().iter().copied()
    }
}

/// Two-state detection machine with cooldown
#[derive(Debug, Clone)]
pub struct DetectionStateMachine {
    state: AlertState,
    last_transition: Option<Instant>,
    cooldown: Duration,
}

impl DetectionStateMachine {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            state: AlertState::Quiet,
            last_transition: None,
            cooldown,
        }
    }

    /// Advance the machine with the decision for the block observed at `now`
    pub fn step(&mut self, detected: bool, now: Instant) -> Notifications {
        let mut emitted = Notifications::default();

        if self.state == AlertState::Alerting {
            let elapsed = self
                .last_transition
                .map_or(Duration::MAX, |since| now.saturating_duration_since(since));

            if elapsed < self.cooldown {
                return emitted;
            }

            debug!("Cooldown elapsed after {:?}, back to quiet", elapsed);
            self.state = AlertState::Quiet;
            emitted.push(false);
        }

        if detected {
            info!("Sound event detected");
            self.state = AlertState::Alerting;
            self.last_transition = Some(now);
            emitted.push(true);
        }

        emitted
    }

    pub fn state(&self) -> AlertState {
        self.state
    }

    pub fn is_alerting(&self) -> bool {
        self.state == AlertState::Alerting
    }

    /// Instant of the last Quiet -> Alerting transition
    pub fn last_transition(&self) -> Option<Instant> {
        self.last_transition
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}
