//! Press-and-hold recognition.
//!
//! A hold is confirmed once the threshold timer fires or the progress ticks
//! accumulate to the full threshold, whichever is observed first. Both timers
//! run as tokio tasks that post [`Event`]s tagged with the session id; the
//! gesture itself only does bookkeeping, so it stays deterministic under a
//! paused clock.

use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, trace};

use crate::config::SosConfig;
use crate::event::Event;
use crate::model::SessionId;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HoldSignal {
    Progress(f64),
    Confirmed,
}

pub struct HoldGesture {
    threshold: Duration,
    tick: Duration,
    session: Option<SessionId>,
    ticks: u32,
    confirmed: bool,
    tick_task: Option<JoinHandle<()>>,
    threshold_task: Option<JoinHandle<()>>,
}

impl HoldGesture {
    #[must_use]
    pub fn new(threshold: Duration, tick: Duration) -> Self {
        Self {
            threshold,
            tick,
            session: None,
            ticks: 0,
            confirmed: false,
            tick_task: None,
            threshold_task: None,
        }
    }

    #[must_use]
    pub fn from_config(config: &SosConfig) -> Self {
        Self::new(config.hold_threshold(), config.tick_interval())
    }

    /// Progress added by one tick, as a fraction of the threshold.
    #[must_use]
    pub fn step(&self) -> f64 {
        self.tick.as_secs_f64() / self.threshold.as_secs_f64()
    }

    #[must_use]
    pub fn progress(&self) -> f64 {
        if self.confirmed {
            return 1.0;
        }
        let held = self.tick.saturating_mul(self.ticks);
        (held.as_secs_f64() / self.threshold.as_secs_f64()).min(1.0)
    }

    #[must_use]
    pub fn session(&self) -> Option<SessionId> {
        self.session
    }

    /// Armed and not yet confirmed.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.session.is_some() && !self.confirmed
    }

    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    /// Arms both timers for `session`. Must run inside a tokio runtime.
    pub fn press_start(&mut self, session: SessionId, events: &UnboundedSender<Event>) {
        self.cancel_timers();
        self.session = Some(session);
        self.ticks = 0;
        self.confirmed = false;

        let tick = self.tick;
        let tick_tx = events.clone();
        self.tick_task = Some(tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + tick, tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if tick_tx.send(Event::HoldTick { session }).is_err() {
                    break;
                }
            }
        }));

        let threshold = self.threshold;
        let threshold_tx = events.clone();
        self.threshold_task = Some(tokio::spawn(async move {
            tokio::time::sleep(threshold).await;
            let _ = threshold_tx.send(Event::HoldThresholdReached { session });
        }));

        debug!(%session, threshold_ms = threshold.as_millis(), "hold armed");
    }

    /// Releases the hold. Returns true when an unconfirmed hold was cancelled.
    pub fn press_end(&mut self) -> bool {
        let cancelled = self.is_active();
        self.reset();
        if cancelled {
            debug!("hold released before threshold");
        }
        cancelled
    }

    pub fn on_tick(&mut self, session: SessionId) -> Option<HoldSignal> {
        if self.session != Some(session) || self.confirmed {
            trace!(%session, "stale hold tick");
            return None;
        }
        self.ticks = self.ticks.saturating_add(1);
        if self.tick.saturating_mul(self.ticks) >= self.threshold {
            return self.confirm();
        }
        Some(HoldSignal::Progress(self.progress()))
    }

    pub fn on_threshold(&mut self, session: SessionId) -> Option<HoldSignal> {
        if self.session != Some(session) || self.confirmed {
            trace!(%session, "stale hold threshold");
            return None;
        }
        self.confirm()
    }

    fn confirm(&mut self) -> Option<HoldSignal> {
        self.confirmed = true;
        self.cancel_timers();
        Some(HoldSignal::Confirmed)
    }

    /// Forgets the session and zeroes progress.
    pub fn reset(&mut self) {
        self.cancel_timers();
        self.session = None;
        self.ticks = 0;
        self.confirmed = false;
    }

    fn cancel_timers(&mut self) {
        if let Some(task) = self.tick_task.take() {
            task.abort();
        }
        if let Some(task) = self.threshold_task.take() {
            task.abort();
        }
    }
}

impl Drop for HoldGesture {
    fn drop(&mut self) {
        self.cancel_timers();
    }
}
