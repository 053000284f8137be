//! Staggered fan-out of a composed alert over the call and message channels.
//!
//! Contact `i` gets a call at `i * stagger` and a message link at
//! `i * stagger + message_offset`. Back-to-back navigation actions race each
//! other on mobile platforms, so every action gets its own slot. Each slot is
//! an independent task that can be aborted until it starts issuing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::capabilities::{ChannelAction, ChannelError, ChannelInvoker, ChannelKind};
use crate::composer::ComposedAlert;
use crate::config::SosConfig;
use crate::model::{Contact, ContactId};

/// Strips everything but ASCII digits.
#[must_use]
pub fn normalize_phone(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(pub u64);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedInvocation {
    pub contact_index: usize,
    pub contact_id: ContactId,
    pub action: ChannelAction,
    /// Delay from the start of the run.
    pub offset: Duration,
}

/// Whether issuing one channel action worked. Says nothing about delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationReport {
    pub run: RunId,
    pub contact_index: usize,
    pub kind: ChannelKind,
    pub outcome: Result<(), ChannelError>,
}

const PENDING: u8 = 0;
const STARTED: u8 = 1;
const CANCELLED: u8 = 2;

pub struct ScheduledInvocation {
    planned: PlannedInvocation,
    state: Arc<AtomicU8>,
    task: JoinHandle<()>,
}

impl ScheduledInvocation {
    #[must_use]
    pub fn planned(&self) -> &PlannedInvocation {
        &self.planned
    }

    /// Still waiting for its slot.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.state.load(Ordering::Acquire) == PENDING
    }

    /// Aborts the invocation if it has not started issuing.
    pub fn cancel(&self) -> bool {
        let cancelled = self
            .state
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if cancelled {
            self.task.abort();
        }
        cancelled
    }
}

/// One fan-out. Dropping it detaches the tasks; they keep running.
pub struct DispatchRun {
    id: RunId,
    started_at: Instant,
    contacts: usize,
    invocations: Vec<ScheduledInvocation>,
    reports: Option<UnboundedReceiver<InvocationReport>>,
}

impl DispatchRun {
    #[must_use]
    pub fn id(&self) -> RunId {
        self.id
    }

    #[must_use]
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    #[must_use]
    pub fn contacts(&self) -> usize {
        self.contacts
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.invocations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.invocations.is_empty()
    }

    #[must_use]
    pub fn invocations(&self) -> &[ScheduledInvocation] {
        &self.invocations
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.invocations.iter().filter(|i| i.is_pending()).count()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.invocations.iter().all(|i| i.task.is_finished())
    }

    /// Issue results, one per invocation that actually ran. Closes once every
    /// task has finished or been aborted.
    pub fn take_reports(&mut self) -> Option<UnboundedReceiver<InvocationReport>> {
        self.reports.take()
    }

    /// Aborts every invocation that has not started. Returns how many.
    pub fn cancel(&self) -> usize {
        let cancelled = self.invocations.iter().filter(|i| i.cancel()).count();
        if cancelled > 0 {
            info!(run = %self.id, cancelled, "dispatch run cancelled");
        }
        cancelled
    }
}

pub struct DispatchScheduler {
    channels: Arc<dyn ChannelInvoker>,
    stagger: Duration,
    message_offset: Duration,
    message_base_url: String,
    next_run: AtomicU64,
}

impl DispatchScheduler {
    pub fn new(
        channels: Arc<dyn ChannelInvoker>,
        stagger: Duration,
        message_offset: Duration,
        message_base_url: impl Into<String>,
    ) -> Self {
        Self {
            channels,
            stagger,
            message_offset,
            message_base_url: message_base_url.into(),
            next_run: AtomicU64::new(1),
        }
    }

    pub fn from_config(channels: Arc<dyn ChannelInvoker>, config: &SosConfig) -> Self {
        Self::new(
            channels,
            config.contact_stagger(),
            config.message_offset(),
            config.message_base_url.clone(),
        )
    }

    /// The schedule as data, ordered by offset.
    #[must_use]
    pub fn plan(&self, contacts: &[Contact], alert: &ComposedAlert) -> Vec<PlannedInvocation> {
        let mut plan = Vec::with_capacity(contacts.len() * 2);
        let mut slot = Duration::ZERO;
        for (index, contact) in contacts.iter().enumerate() {
            let digits = contact.dial_digits();
            plan.push(PlannedInvocation {
                contact_index: index,
                contact_id: contact.id.clone(),
                action: ChannelAction::call(&digits),
                offset: slot,
            });
            plan.push(PlannedInvocation {
                contact_index: index,
                contact_id: contact.id.clone(),
                action: ChannelAction::message(
                    &self.message_base_url,
                    &digits,
                    &alert.encoded_message,
                ),
                offset: slot + self.message_offset,
            });
            slot += self.stagger;
        }
        plan
    }

    /// Schedules the fan-out and returns immediately. Must run inside a tokio
    /// runtime.
    pub fn dispatch(&self, contacts: &[Contact], alert: &ComposedAlert) -> DispatchRun {
        let id = RunId(self.next_run.fetch_add(1, Ordering::Relaxed));
        let started_at = Instant::now();
        let (report_tx, report_rx) = mpsc::unbounded_channel();

        let invocations = self
            .plan(contacts, alert)
            .into_iter()
            .map(|planned| {
                let state = Arc::new(AtomicU8::new(PENDING));
                let deadline = started_at + planned.offset;
                let channels = Arc::clone(&self.channels);
                let action = planned.action.clone();
                let contact_index = planned.contact_index;
                let task_state = Arc::clone(&state);
                let reports = report_tx.clone();

                let task = tokio::spawn(async move {
                    tokio::time::sleep_until(deadline).await;
                    if task_state
                        .compare_exchange(PENDING, STARTED, Ordering::AcqRel, Ordering::Acquire)
                        .is_err()
                    {
                        return;
                    }
                    let outcome = channels.invoke(&action).await;
                    match &outcome {
                        Ok(()) => debug!(run = %id, contact_index, kind = ?action.kind, "channel action issued"),
                        Err(e) => warn!(run = %id, contact_index, kind = ?action.kind, error = %e, "channel action failed"),
                    }
                    let _ = reports.send(InvocationReport {
                        run: id,
                        contact_index,
                        kind: action.kind,
                        outcome,
                    });
                });

                ScheduledInvocation {
                    planned,
                    state,
                    task,
                }
            })
            .collect::<Vec<_>>();

        info!(
            run = %id,
            contacts = contacts.len(),
            invocations = invocations.len(),
            "dispatch scheduled"
        );

        DispatchRun {
            id,
            started_at,
            contacts: contacts.len(),
            invocations,
            reports: Some(report_rx),
        }
    }
}
