// Press-and-hold gesture that arms and fires the SOS signal
// Plain state machine over explicit instants; the owner polls it at the deadline,
// so a release handled before the poll always wins

use log::{debug, info};
use std::time::Duration;
use tokio::time::Instant;

pub const SOS_HOLD_DURATION: Duration = Duration::from_millis(5000);
pub const SOS_COOLDOWN: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureState {
    Idle,
    /// Button held, counting down to the trigger
    Armed,
    /// Trigger fired, showing the activated state until the cool-down ends
    Triggered,
}

/// Transition reported back to the owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureEvent {
    Armed,
    Cancelled,
    /// The distress action must run now; reported once per press-hold cycle
    Fired,
    CooledDown,
}

#[derive(Debug)]
pub struct SosGesture {
    hold: Duration,
    cooldown: Duration,
    state: GestureState,
    deadline: Option<Instant>,
}

impl Default for SosGesture {
    fn default() -> Self {
        Self::new(SOS_HOLD_DURATION, SOS_COOLDOWN)
    }
}

impl SosGesture {
    pub fn new(hold: Duration, cooldown: Duration) -> Self {
        Self {
            hold,
            cooldown,
            state: GestureState::Idle,
            deadline: None,
        }
    }

    pub fn state(&self) -> GestureState {
        self.state
    }

    /// When the owner must call [`poll`](Self::poll) next, if anything is scheduled
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn press(&mut self, now: Instant) -> Option<GestureEvent> {
        if self.state != GestureState::Idle {
            debug!("SOS press ignored while {:?}", self.state);
            return None;
        }
        self.state = GestureState::Armed;
        self.deadline = Some(now + self.hold);
        debug!("SOS armed, firing in {:?}", self.hold);
        Some(GestureEvent::Armed)
    }

    pub fn release(&mut self, _now: Instant) -> Option<GestureEvent> {
        if self.state != GestureState::Armed {
            return None;
        }
        self.state = GestureState::Idle;
        self.deadline = None;
        debug!("SOS hold released before trigger");
        Some(GestureEvent::Cancelled)
    }

    pub fn poll(&mut self, now: Instant) -> Option<GestureEvent> {
        let deadline = self.deadline?;
        if now < deadline {
            return None;
        }
        match self.state {
            GestureState::Armed => {
                info!("SOS hold completed, triggering");
                self.state = GestureState::Triggered;
                self.deadline = Some(deadline + self.cooldown);
                Some(GestureEvent::Fired)
            }
            GestureState::Triggered => {
                self.state = GestureState::Idle;
                self.deadline = None;
                Some(GestureEvent::CooledDown)
            }
            GestureState::Idle => {
                self.deadline = None;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_release_before_hold_cancels() {
        let t0 = Instant::now();
        let mut sos = SosGesture::default();

        assert_eq!(sos.press(t0), Some(GestureEvent::Armed));
        assert_eq!(sos.poll(t0 + ms(4999)), None);
        assert_eq!(sos.release(t0 + ms(4999)), Some(GestureEvent::Cancelled));
        assert_eq!(sos.state(), GestureState::Idle);
        assert_eq!(sos.deadline(), None);
        assert_eq!(sos.poll(t0 + ms(10_000)), None);
    }

    #[test]
    fn test_hold_fires_once_then_cools_down() {
        let t0 = Instant::now();
        let mut sos = SosGesture::default();

        sos.press(t0);
        assert_eq!(sos.deadline(), Some(t0 + ms(5000)));
        assert_eq!(sos.poll(t0 + ms(5000)), Some(GestureEvent::Fired));
        assert_eq!(sos.state(), GestureState::Triggered);
        assert_eq!(sos.poll(t0 + ms(5001)), None);

        // presses and releases during the cool-down change nothing
        assert_eq!(sos.press(t0 + ms(6000)), None);
        assert_eq!(sos.release(t0 + ms(6500)), None);

        assert_eq!(sos.poll(t0 + ms(7999)), None);
        assert_eq!(sos.poll(t0 + ms(8000)), Some(GestureEvent::CooledDown));
        assert_eq!(sos.state(), GestureState::Idle);
        assert_eq!(sos.poll(t0 + ms(20_000)), None);
    }

    #[test]
    fn test_late_poll_still_fires_once() {
        let t0 = Instant::now();
        let mut sos = SosGesture::default();

        sos.press(t0);
        assert_eq!(sos.press(t0 + ms(100)), None);
        assert_eq!(sos.poll(t0 + ms(6000)), Some(GestureEvent::Fired));
        // cool-down is measured from the scheduled trigger, not the late poll
        assert_eq!(sos.deadline(), Some(t0 + ms(8000)));
    }

    #[test]
    fn test_new_cycle_after_cooldown() {
        let t0 = Instant::now();
        let mut sos = SosGesture::new(ms(100), ms(50));

        sos.press(t0);
        assert_eq!(sos.poll(t0 + ms(100)), Some(GestureEvent::Fired));
        assert_eq!(sos.poll(t0 + ms(150)), Some(GestureEvent::CooledDown));
        assert_eq!(sos.press(t0 + ms(200)), Some(GestureEvent::Armed));
        assert_eq!(sos.poll(t0 + ms(300)), Some(GestureEvent::Fired));
    }
}
