use tokio::sync::oneshot;

use crate::capabilities::LocationError;
use crate::dispatch::InvocationReport;
use crate::model::{LocationFix, SessionId};

/// Everything the controller reacts to. Shell input arrives through
/// [`crate::SosHandle`]; the rest is posted back by timers and tasks the
/// controller spawned, tagged with the session that spawned them so late
/// callbacks from an abandoned session are dropped.
#[derive(Debug)]
pub enum Event {
    PressStarted,
    PressEnded,
    ContactsChanged,
    CancelDispatch {
        reply: Option<oneshot::Sender<usize>>,
    },
    Unmount,

    HoldTick {
        session: SessionId,
    },
    HoldThresholdReached {
        session: SessionId,
    },
    LocationResolved {
        session: SessionId,
        result: Result<LocationFix, LocationError>,
    },
    SuccessWindowElapsed {
        session: SessionId,
    },
    InvocationReported(InvocationReport),
}

impl Event {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::PressStarted => "press_started",
            Self::PressEnded => "press_ended",
            Self::ContactsChanged => "contacts_changed",
            Self::CancelDispatch { .. } => "cancel_dispatch",
            Self::Unmount => "unmount",
            Self::HoldTick { .. } => "hold_tick",
            Self::HoldThresholdReached { .. } => "hold_threshold_reached",
            Self::LocationResolved { .. } => "location_resolved",
            Self::SuccessWindowElapsed { .. } => "success_window_elapsed",
            Self::InvocationReported(_) => "invocation_reported",
        }
    }

    /// High-frequency events kept out of info-level logs.
    #[must_use]
    pub const fn is_noisy(&self) -> bool {
        matches!(self, Self::HoldTick { .. })
    }
}
