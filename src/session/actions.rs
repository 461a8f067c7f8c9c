//! Project action scheduling
//!
//! Keeps the timer state of every project [`Action`] for one device session.
//! The scheduler never touches the driver; it hands payloads back to the
//! I/O thread, which writes them.

use crate::error::Result;
use crate::project::{Action, TimerMode};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct ScheduledAction {
    title: String,
    payload: Vec<u8>,
    mode: TimerMode,
    interval: Option<Duration>,
    on_connect: bool,
    /// Next timer deadline, `None` while the timer is stopped
    next: Option<Instant>,
}

impl ScheduledAction {
    fn start_timer(&mut self, now: Instant) {
        self.next = self.interval.map(|interval| now + interval);
    }
}

/// Timer state for a session's actions
#[derive(Debug, Default)]
pub struct ActionScheduler {
    actions: Vec<ScheduledAction>,
}

impl ActionScheduler {
    /// Resolve every action payload up front
    pub fn new(actions: &[Action]) -> Result<Self> {
        let actions = actions
            .iter()
            .map(|action| {
                action.validate()?;
                Ok(ScheduledAction {
                    title: action.title.clone(),
                    payload: action.payload()?,
                    mode: action.timer_mode,
                    interval: action.interval(),
                    on_connect: action.auto_execute_on_connect,
                    next: None,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { actions })
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Payloads to send once the device is connected; starts auto timers
    pub fn on_connect(&mut self, now: Instant) -> Vec<Vec<u8>> {
        let mut payloads = Vec::new();
        for action in &mut self.actions {
            if action.on_connect {
                tracing::debug!("Action '{}' runs on connect", action.title);
                payloads.push(action.payload.clone());
            }
            if action.mode == TimerMode::AutoStart {
                action.start_timer(now);
            }
        }
        payloads
    }

    /// Payload for a user trigger of action `index`
    ///
    /// Returns `None` for an unknown index, or when the trigger stops a
    /// toggled timer.
    pub fn trigger(&mut self, index: usize, now: Instant) -> Option<Vec<u8>> {
        let Some(action) = self.actions.get_mut(index) else {
            tracing::warn!("No action at index {}", index);
            return None;
        };

        match action.mode {
            TimerMode::Off | TimerMode::AutoStart => {}
            TimerMode::StartOnTrigger => {
                if action.next.is_none() {
                    action.start_timer(now);
                }
            }
            TimerMode::ToggleOnTrigger => {
                if action.next.take().is_some() {
                    tracing::debug!("Action '{}' timer stopped", action.title);
                    return None;
                }
                action.start_timer(now);
            }
        }
        Some(action.payload.clone())
    }

    /// Payloads of timers that expired by `now`; each fires at most once per call
    pub fn due(&mut self, now: Instant) -> Vec<Vec<u8>> {
        let mut payloads = Vec::new();
        for action in &mut self.actions {
            if action.next.is_some_and(|deadline| deadline <= now) {
                payloads.push(action.payload.clone());
                action.start_timer(now);
            }
        }
        payloads
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_on_connect() {
        let mut scheduler = ActionScheduler::new(&[
            Action::new("Hello", "HI").with_eol("\n").on_connect(),
            Action::new("Idle", "X"),
            Action::new("Poll", "?").with_timer(TimerMode::AutoStart, ms(100)),
        ])
        .unwrap();
        let start = Instant::now();

        assert_eq!(scheduler.on_connect(start), vec![b"HI\n".to_vec()]);
        assert!(scheduler.due(start + ms(50)).is_empty());
        assert_eq!(scheduler.due(start + ms(100)), vec![b"?".to_vec()]);
        assert!(scheduler.due(start + ms(150)).is_empty());
        assert_eq!(scheduler.due(start + ms(250)), vec![b"?".to_vec()]);
    }

    #[test]
    fn test_trigger_modes() {
        let mut scheduler = ActionScheduler::new(&[
            Action::new("Once", "1"),
            Action::new("Start", "2").with_timer(TimerMode::StartOnTrigger, ms(10)),
            Action::new("Toggle", "3").with_timer(TimerMode::ToggleOnTrigger, ms(10)),
        ])
        .unwrap();
        let start = Instant::now();

        assert_eq!(scheduler.trigger(0, start), Some(b"1".to_vec()));
        assert!(scheduler.due(start + ms(100)).is_empty());

        assert_eq!(scheduler.trigger(1, start), Some(b"2".to_vec()));
        assert_eq!(scheduler.trigger(2, start), Some(b"3".to_vec()));
        assert_eq!(
            scheduler.due(start + ms(10)),
            vec![b"2".to_vec(), b"3".to_vec()]
        );

        // Second toggle stops the timer without sending
        assert_eq!(scheduler.trigger(2, start + ms(15)), None);
        assert_eq!(scheduler.due(start + ms(40)), vec![b"2".to_vec()]);

        assert_eq!(scheduler.trigger(7, start), None);
    }

    #[test]
    fn test_invalid_action_rejected() {
        assert!(ActionScheduler::new(&[Action::new("Bad", "0g").binary()]).is_err());
        assert!(ActionScheduler::new(&[]).unwrap().is_empty());
    }
}
