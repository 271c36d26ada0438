use crate::{NetdumpError, Result};
use chrono::{DateTime, Local, TimeZone};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use log::{debug, info, warn};
use std::str::FromStr;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A validated six-field cron expression (seconds first).
#[derive(Debug, Clone)]
pub struct RotationSchedule {
    expr: String,
    schedule: cron::Schedule,
}

impl RotationSchedule {
    pub fn parse(expr: &str) -> Result<Self> {
        let expr = expr.trim();
        let invalid = |reason: String| NetdumpError::InvalidSchedule {
            expr: expr.to_string(),
            reason,
        };

        if expr.is_empty() {
            return Err(invalid("empty expression".to_string()));
        }
        if !expr.starts_with('@') {
            let fields = expr.split_whitespace().count();
            if fields != 6 {
                return Err(invalid(format!(
                    "expected 6 fields (sec min hour dom month dow), got {}",
                    fields
                )));
            }
        }

        let schedule = cron::Schedule::from_str(expr).map_err(|e| invalid(e.to_string()))?;
        Ok(Self {
            expr: expr.to_string(),
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expr
    }

    /// First fire time strictly after `after`.
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        self.schedule.after(after).next()
    }
}

/// Emits rotation events on a [`RotationSchedule`] from a timer thread.
///
/// The event channel holds at most one unconsumed event: a fire that finds
/// the slot full is folded into the pending one. Dropping the trigger stops
/// the timer thread.
pub struct RotationTrigger {
    events: Receiver<()>,
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl RotationTrigger {
    pub fn start(schedule: RotationSchedule) -> Result<Self> {
        let (event_tx, events) = bounded(1);
        let (stop, stop_rx) = bounded::<()>(0);

        info!("Rotating files on schedule {:?}", schedule.expression());
        let handle = thread::Builder::new()
            .name("rotation-trigger".to_string())
            .spawn(move || run_timer(&schedule, &event_tx, &stop_rx))?;

        Ok(Self {
            events,
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    pub fn events(&self) -> &Receiver<()> {
        &self.events
    }
}

impl Drop for RotationTrigger {
    fn drop(&mut self) {
        // Disconnecting the stop channel wakes the timer thread.
        drop(self.stop.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Rotation trigger thread panicked");
            }
        }
    }
}

fn run_timer(schedule: &RotationSchedule, events: &Sender<()>, stop: &Receiver<()>) {
    let mut last_fire = Local::now();
    loop {
        let now = Local::now().max(last_fire);
        let Some(next) = schedule.next_after(&now) else {
            info!("Schedule {:?} has no further fire times", schedule.expression());
            return;
        };

        let wait = (next - Local::now()).to_std().unwrap_or(Duration::ZERO);
        match stop.recv_timeout(wait) {
            Err(RecvTimeoutError::Timeout) => {
                last_fire = next;
                if !fire(events) {
                    return;
                }
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

/// Posts a rotation event into the single-slot channel. Returns `false` once
/// nobody is listening any more.
pub(crate) fn fire(events: &Sender<()>) -> bool {
    match events.try_send(()) {
        Ok(()) => true,
        Err(TrySendError::Full(())) => {
            debug!("Rotation already pending, coalescing schedule fire");
            true
        }
        Err(TrySendError::Disconnected(())) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn every_fifteen_minutes() {
        let schedule = RotationSchedule::parse("0 */15 * * * *").unwrap();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let first = schedule.next_after(&start).unwrap();
        assert_eq!(first, Utc.with_ymd_and_hms(2024, 1, 1, 0, 15, 0).unwrap());
        let second = schedule.next_after(&first).unwrap();
        assert_eq!(second, Utc.with_ymd_and_hms(2024, 1, 1, 0, 30, 0).unwrap());
    }

    #[test]
    fn accepts_descriptors() {
        assert!(RotationSchedule::parse("@hourly").is_ok());
    }

    #[test]
    fn rejects_malformed_expressions() {
        for expr in ["", "*/15 * * * *", "0 */15 * * * * 2024", "bogus"] {
            let err = RotationSchedule::parse(expr).unwrap_err();
            assert!(
                matches!(err, NetdumpError::InvalidSchedule { .. }),
                "{expr:?} should be rejected"
            );
        }
    }

    #[test]
    fn fires_coalesce_into_one_pending_event() {
        let (tx, rx) = bounded(1);
        assert!(fire(&tx));
        assert!(fire(&tx));
        assert!(fire(&tx));
        assert_eq!(rx.len(), 1);
        rx.try_recv().unwrap();
        assert!(rx.try_recv().is_err());

        drop(rx);
        assert!(!fire(&tx));
    }

    #[test]
    fn trigger_emits_events_and_stops_on_drop() {
        let trigger = RotationTrigger::start(RotationSchedule::parse("* * * * * *").unwrap()).unwrap();
        trigger
            .events()
            .recv_timeout(Duration::from_secs(3))
            .expect("no rotation event within 3s");
        drop(trigger);
    }
}
