//! Page activity state machine: idle, gesture, render

use std::time::{Duration, Instant};

/// How long a render phase may run without progress before the watchdog
/// forces idle.
pub const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Activity {
    Idle,
    /// User input is actively changing the viewport
    Gesture,
    /// In-flight render work after gesture end
    Render,
}

/// Commands that advance the activity state.
#[derive(Clone, Copy, Debug)]
pub enum Command {
    GestureBegan,
    GestureEnded,
    RenderStarted,
    /// A tile completion or other forward progress
    Progress,
    RenderSettled,
    WatchdogTick,
}

/// Effects produced by state changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Effect {
    /// Gesture input started: stop queueing low-priority prefetch
    SuppressPrefetch,
    /// Gesture ended: prefetch may resume
    ResumePrefetch,
    /// Watchdog expired a stuck render phase
    ForceIdle,
}

/// Per-page activity lifecycle with a progress watchdog.
#[derive(Debug)]
pub struct ActivityState {
    activity: Activity,
    last_progress: Instant,
}

impl ActivityState {
    #[must_use]
    pub fn new(now: Instant) -> Self {
        Self {
            activity: Activity::Idle,
            last_progress: now,
        }
    }

    #[must_use]
    pub fn activity(&self) -> Activity {
        self.activity
    }

    /// Low-priority prefetch is suppressed during gestures.
    #[must_use]
    pub fn prefetch_allowed(&self) -> bool {
        self.activity != Activity::Gesture
    }

    /// Apply a command and return resulting effects.
    pub fn apply(&mut self, cmd: Command, now: Instant) -> Vec<Effect> {
        match cmd {
            Command::GestureBegan => {
                let was_gesture = self.activity == Activity::Gesture;
                self.activity = Activity::Gesture;
                self.last_progress = now;
                if was_gesture {
                    vec![]
                } else {
                    vec![Effect::SuppressPrefetch]
                }
            }

            Command::GestureEnded => {
                if self.activity == Activity::Gesture {
                    self.activity = Activity::Render;
                    self.last_progress = now;
                    vec![Effect::ResumePrefetch]
                } else {
                    vec![]
                }
            }

            Command::RenderStarted => {
                if self.activity != Activity::Gesture {
                    self.activity = Activity::Render;
                }
                self.last_progress = now;
                vec![]
            }

            Command::Progress => {
                self.last_progress = now;
                vec![]
            }

            Command::RenderSettled => {
                if self.activity == Activity::Render {
                    self.activity = Activity::Idle;
                }
                vec![]
            }

            Command::WatchdogTick => {
                if self.activity == Activity::Render
                    && now.duration_since(self.last_progress) >= WATCHDOG_TIMEOUT
                {
                    self.activity = Activity::Idle;
                    vec![Effect::ForceIdle]
                } else {
                    vec![]
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gesture_suppresses_then_resumes_prefetch() {
        let now = Instant::now();
        let mut state = ActivityState::new(now);

        let effects = state.apply(Command::GestureBegan, now);
        assert_eq!(effects, vec![Effect::SuppressPrefetch]);
        assert_eq!(state.activity(), Activity::Gesture);
        assert!(!state.prefetch_allowed());

        // Re-entering gesture is quiet
        assert!(state.apply(Command::GestureBegan, now).is_empty());

        let effects = state.apply(Command::GestureEnded, now);
        assert_eq!(effects, vec![Effect::ResumePrefetch]);
        assert_eq!(state.activity(), Activity::Render);
        assert!(state.prefetch_allowed());
    }

    #[test]
    fn render_settles_to_idle() {
        let now = Instant::now();
        let mut state = ActivityState::new(now);
        state.apply(Command::RenderStarted, now);
        assert_eq!(state.activity(), Activity::Render);
        state.apply(Command::RenderSettled, now);
        assert_eq!(state.activity(), Activity::Idle);
    }

    #[test]
    fn watchdog_forces_idle_after_timeout() {
        let now = Instant::now();
        let mut state = ActivityState::new(now);
        state.apply(Command::RenderStarted, now);

        let soon = now + Duration::from_secs(1);
        assert!(state.apply(Command::WatchdogTick, soon).is_empty());

        let late = now + WATCHDOG_TIMEOUT;
        assert_eq!(state.apply(Command::WatchdogTick, late), vec![Effect::ForceIdle]);
        assert_eq!(state.activity(), Activity::Idle);
    }

    #[test]
    fn progress_feeds_the_watchdog() {
        let now = Instant::now();
        let mut state = ActivityState::new(now);
        state.apply(Command::RenderStarted, now);
        state.apply(Command::Progress, now + Duration::from_secs(4));

        let tick = now + Duration::from_secs(6);
        assert!(state.apply(Command::WatchdogTick, tick).is_empty());
        assert_eq!(state.activity(), Activity::Render);
    }

    #[test]
    fn render_start_during_gesture_stays_gesture() {
        let now = Instant::now();
        let mut state = ActivityState::new(now);
        state.apply(Command::GestureBegan, now);
        state.apply(Command::RenderStarted, now);
        assert_eq!(state.activity(), Activity::Gesture);
    }
}
