//! Confirm-with-timeout machine for guarded actions.
//!
//! A destructive effect (the repository push) never runs off a single
//! event: a trigger arms the machine, and only a qualifying confirm
//! inside the deadline window fires it. The machine is pure state; the
//! supervisor owns the actual timer and feeds expiry back in as an event
//! carrying the generation it was armed with. A generation mismatch
//! makes a late-firing timer a no-op, so a timer callback and a
//! late-arriving confirm can never both apply: whichever reaches the
//! machine first wins.

use std::time::{Duration, Instant};

/// How long a triggered action stays armed awaiting confirmation.
pub const CONFIRM_WINDOW: Duration = Duration::from_secs(5);

/// Result of feeding a confirm event to the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// Armed and inside the window: the guarded action runs now.
    Confirmed,
    /// Armed but the window had already elapsed; the trigger is aborted.
    Expired,
    /// Nothing was pending; the event is ignored.
    NotArmed,
}

/// A freshly armed trigger: when it dies and which generation owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Armed {
    pub deadline: Instant,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Awaiting { deadline: Instant },
}

/// The guarded-action state machine. One instance per guarded effect.
#[derive(Debug)]
pub struct ConfirmableAction {
    state: State,
    // Bumped on every transition out of Awaiting and on re-trigger, so
    // any previously scheduled timer becomes stale.
    generation: u64,
    window: Duration,
}

impl Default for ConfirmableAction {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfirmableAction {
    pub fn new() -> Self {
        Self::with_window(CONFIRM_WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            state: State::Idle,
            generation: 0,
            window,
        }
    }

    /// Arm the machine. Re-triggering while armed replaces the pending
    /// deadline; the previous timer is invalidated by the generation bump
    /// (last trigger wins).
    pub fn trigger(&mut self, now: Instant) -> Armed {
        let deadline = now + self.window;
        self.generation += 1;
        self.state = State::Awaiting { deadline };
        Armed {
            deadline,
            generation: self.generation,
        }
    }

    /// Feed a qualifying confirm event. Returns [`Confirmation::Confirmed`]
    /// at most once per trigger; an expired or idle machine never fires.
    pub fn confirm(&mut self, now: Instant) -> Confirmation {
        match self.state {
            State::Idle => Confirmation::NotArmed,
            State::Awaiting { deadline } => {
                self.disarm();
                if now <= deadline {
                    Confirmation::Confirmed
                } else {
                    Confirmation::Expired
                }
            }
        }
    }

    /// Deadline timer fired. Aborts only when `generation` still matches
    /// the pending trigger; a stale timer is a no-op. Returns whether a
    /// pending confirmation was aborted.
    pub fn expire(&mut self, generation: u64) -> bool {
        match self.state {
            State::Awaiting { .. } if generation == self.generation => {
                self.disarm();
                true
            }
            _ => false,
        }
    }

    /// Explicit cancel or supervisor teardown. Idempotent; returns
    /// whether a confirmation was pending.
    pub fn cancel(&mut self) -> bool {
        match self.state {
            State::Awaiting { .. } => {
                self.disarm();
                true
            }
            State::Idle => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        matches!(self.state, State::Awaiting { .. })
    }

    fn disarm(&mut self) {
        self.state = State::Idle;
        self.generation += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> ConfirmableAction {
        ConfirmableAction::with_window(Duration::from_secs(5))
    }

    #[test]
    fn test_confirm_within_window_fires_once() {
        let mut m = machine();
        let now = Instant::now();
        m.trigger(now);
        assert!(m.is_armed());
        assert_eq!(m.confirm(now + Duration::from_secs(2)), Confirmation::Confirmed);
        assert!(!m.is_armed());
        // Second confirm for the same trigger has nothing to fire.
        assert_eq!(m.confirm(now + Duration::from_secs(3)), Confirmation::NotArmed);
    }

    #[test]
    fn test_confirm_after_deadline_aborts() {
        let mut m = machine();
        let now = Instant::now();
        m.trigger(now);
        assert_eq!(m.confirm(now + Duration::from_secs(6)), Confirmation::Expired);
        assert!(!m.is_armed());
    }

    #[test]
    fn test_confirm_without_trigger_is_ignored() {
        let mut m = machine();
        assert_eq!(m.confirm(Instant::now()), Confirmation::NotArmed);
    }

    #[test]
    fn test_expiry_aborts_exactly_once() {
        let mut m = machine();
        let armed = m.trigger(Instant::now());
        assert!(m.expire(armed.generation));
        assert!(!m.is_armed());
        assert!(!m.expire(armed.generation));
    }

    #[test]
    fn test_stale_timer_after_confirm_is_noop() {
        let mut m = machine();
        let now = Instant::now();
        let armed = m.trigger(now);
        assert_eq!(m.confirm(now), Confirmation::Confirmed);
        // The timer for the consumed trigger fires late: nothing happens.
        assert!(!m.expire(armed.generation));
    }

    #[test]
    fn test_retrigger_invalidates_previous_timer() {
        let mut m = machine();
        let now = Instant::now();
        let first = m.trigger(now);
        let second = m.trigger(now + Duration::from_secs(1));
        assert_ne!(first.generation, second.generation);
        // The first timer fires: stale, still armed on the second trigger.
        assert!(!m.expire(first.generation));
        assert!(m.is_armed());
        // The second timer is the live one.
        assert!(m.expire(second.generation));
        assert!(!m.is_armed());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut m = machine();
        m.trigger(Instant::now());
        assert!(m.cancel());
        assert!(!m.cancel());
        assert!(!m.is_armed());
    }

    #[test]
    fn test_exactly_one_outcome_per_trigger() {
        // Confirm then expiry, and expiry then confirm, each resolve once.
        let mut m = machine();
        let now = Instant::now();
        let armed = m.trigger(now);
        assert_eq!(m.confirm(now), Confirmation::Confirmed);
        assert!(!m.expire(armed.generation));

        let armed = m.trigger(now);
        assert!(m.expire(armed.generation));
        assert_eq!(m.confirm(now), Confirmation::NotArmed);
    }
}
