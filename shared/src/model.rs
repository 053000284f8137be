use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::capabilities::LocationError;
use crate::dispatch::{normalize_phone, RunId};
use crate::{AppError, UnixTimeMs, UserFacingError, DEFAULT_DISPLAY_NAME, SOS_FAILURE_MESSAGE};

// --- Typed IDs ---

macro_rules! typed_id {
    ($name:ident) => {
        #[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

typed_id!(UserId);
typed_id!(ContactId);

impl ContactId {
    /// Locally minted id; contacts never round-trip through a server.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("local-{}", Uuid::new_v4()))
    }
}

// --- Location fix: validated, immutable after capture ---

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum CoordinateError {
    #[error("coordinates must be finite (lat={0}, lon={1})")]
    NotFinite(f64, f64),
    #[error("latitude {0} is out of valid range [-90, 90]")]
    LatitudeOutOfRange(f64),
    #[error("longitude {0} is out of valid range [-180, 180]")]
    LongitudeOutOfRange(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    latitude: f64,
    longitude: f64,
}

impl LocationFix {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, CoordinateError> {
        if !latitude.is_finite() || !longitude.is_finite() {
            return Err(CoordinateError::NotFinite(latitude, longitude));
        }
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(CoordinateError::LatitudeOutOfRange(latitude));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(CoordinateError::LongitudeOutOfRange(longitude));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    #[must_use]
    pub const fn latitude(&self) -> f64 {
        self.latitude
    }

    #[must_use]
    pub const fn longitude(&self) -> f64 {
        self.longitude
    }
}

// --- Contacts ---

#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Contact {
    pub id: ContactId,
    pub owner_id: UserId,
    pub name: String,
    pub phone: String,
    pub created_at: UnixTimeMs,
}

impl Contact {
    /// Digits only, as handed to the call and message channels.
    #[must_use]
    pub fn dial_digits(&self) -> String {
        normalize_phone(&self.phone)
    }
}

// Phone numbers of third parties stay out of logs.
impl fmt::Debug for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Contact")
            .field("id", &self.id)
            .field("owner_id", &self.owner_id)
            .field("name", &self.name)
            .field("phone", &"[REDACTED]")
            .field("created_at", &self.created_at)
            .finish()
    }
}

// --- Identity, profile, owner ---

/// The authenticated session as supplied by the shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
    pub email: Option<String>,
}

impl Identity {
    /// Local part of the email, or the generic fallback.
    #[must_use]
    pub fn default_display_name(&self) -> String {
        self.email
            .as_deref()
            .and_then(|email| email.split('@').next())
            .map(str::trim)
            .filter(|local| !local.is_empty())
            .map_or_else(|| DEFAULT_DISPLAY_NAME.to_string(), str::to_string)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: UserId,
    pub full_name: String,
    #[serde(default)]
    pub phone_number: Option<String>,
    pub created_at: UnixTimeMs,
}

/// Who an alert is sent on behalf of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub id: UserId,
    pub display_name: String,
}

impl Owner {
    #[must_use]
    pub fn from_profile(profile: &Profile) -> Self {
        let display_name = if profile.full_name.trim().is_empty() {
            DEFAULT_DISPLAY_NAME.to_string()
        } else {
            profile.full_name.trim().to_string()
        };
        Self {
            id: profile.id.clone(),
            display_name,
        }
    }
}

// --- SOS history entries ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SosStatus {
    #[default]
    Active,
    Resolved,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SosEvent {
    pub owner_id: UserId,
    pub owner_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub location_url: String,
    pub timestamp: UnixTimeMs,
    pub status: SosStatus,
}

impl SosEvent {
    #[must_use]
    pub fn active(
        owner: &Owner,
        fix: LocationFix,
        location_url: impl Into<String>,
        timestamp: UnixTimeMs,
    ) -> Self {
        Self {
            owner_id: owner.id.clone(),
            owner_name: owner.display_name.clone(),
            latitude: fix.latitude(),
            longitude: fix.longitude(),
            location_url: location_url.into(),
            timestamp,
            status: SosStatus::Active,
        }
    }
}

// --- Trigger sessions ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerPhase {
    Holding,
    Dispatching,
    Completed,
}

/// One hold-to-dispatch attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerSession {
    pub id: SessionId,
    pub hold_started_at: UnixTimeMs,
    pub progress_ratio: f64,
    pub phase: TriggerPhase,
}

impl TriggerSession {
    #[must_use]
    pub fn start(id: SessionId, now: UnixTimeMs) -> Self {
        Self {
            id,
            hold_started_at: now,
            progress_ratio: 0.0,
            phase: TriggerPhase::Holding,
        }
    }
}

// --- UI-facing state ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SosState {
    /// No contacts configured; display only.
    #[default]
    NoContacts,
    Idle,
    Holding,
    Dispatching,
    Success,
}

impl SosState {
    #[must_use]
    pub const fn accepts_press(self) -> bool {
        matches!(self, Self::Idle)
    }

    #[must_use]
    pub const fn button_label(self) -> &'static str {
        match self {
            Self::NoContacts => "Add an emergency contact to enable SOS",
            Self::Idle => "Hold to Send SOS",
            Self::Holding => "Keep Holding...",
            Self::Dispatching => "Sending SOS...",
            Self::Success => "SOS Sent Successfully!",
        }
    }
}

/// Why the last trigger attempt failed, ready for an alert dialog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureNotice {
    pub cause: LocationError,
    pub message: String,
    pub hint: String,
    pub error: UserFacingError,
}

impl FailureNotice {
    #[must_use]
    pub fn from_location(cause: LocationError) -> Self {
        let app_error = AppError::from(cause.clone());
        Self {
            cause,
            message: SOS_FAILURE_MESSAGE.to_string(),
            hint: app_error.user_facing_message(),
            error: UserFacingError::from(&app_error),
        }
    }
}

/// Issuance progress of one dispatch run. Counts channel actions handed to
/// the platform, not deliveries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchProgress {
    pub run: RunId,
    pub scheduled: usize,
    pub issued: usize,
    pub failed: usize,
    pub cancelled: usize,
    contact_reached: Vec<bool>,
}

impl DispatchProgress {
    #[must_use]
    pub fn new(run: RunId, contacts: usize, scheduled: usize) -> Self {
        Self {
            run,
            scheduled,
            issued: 0,
            failed: 0,
            cancelled: 0,
            contact_reached: vec![false; contacts],
        }
    }

    pub fn record(&mut self, contact_index: usize, issued: bool) {
        if issued {
            self.issued += 1;
            if let Some(reached) = self.contact_reached.get_mut(contact_index) {
                *reached = true;
            }
        } else {
            self.failed += 1;
        }
    }

    #[must_use]
    pub fn contacts_total(&self) -> usize {
        self.contact_reached.len()
    }

    /// Contacts for which at least one channel action was issued.
    #[must_use]
    pub fn contacts_reached(&self) -> usize {
        self.contact_reached.iter().filter(|reached| **reached).count()
    }

    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.issued + self.failed + self.cancelled >= self.scheduled
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SosView {
    pub state: SosState,
    pub progress_ratio: f64,
    pub contact_count: usize,
    pub button_label: String,
    pub failure: Option<FailureNotice>,
    pub dispatch: Option<DispatchProgress>,
}

impl Default for SosView {
    fn default() -> Self {
        Self {
            state: SosState::NoContacts,
            progress_ratio: 0.0,
            contact_count: 0,
            button_label: SosState::NoContacts.button_label().to_string(),
            failure: None,
            dispatch: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_fix_rejects_out_of_range() {
        assert!(LocationFix::new(-26.2041, 28.0473).is_ok());
        assert!(LocationFix::new(90.0, 180.0).is_ok());
        assert!(matches!(
            LocationFix::new(91.0, 0.0),
            Err(CoordinateError::LatitudeOutOfRange(_))
        ));
        assert!(matches!(
            LocationFix::new(0.0, -180.5),
            Err(CoordinateError::LongitudeOutOfRange(_))
        ));
        assert!(matches!(
            LocationFix::new(f64::NAN, 0.0),
            Err(CoordinateError::NotFinite(..))
        ));
    }

    #[test]
    fn display_name_from_email_local_part() {
        let identity = Identity {
            user_id: UserId::new("u1"),
            email: Some("thandi.m@example.org".into()),
        };
        assert_eq!(identity.default_display_name(), "thandi.m");

        let no_email = Identity {
            user_id: UserId::new("u2"),
            email: None,
        };
        assert_eq!(no_email.default_display_name(), "User");

        let empty_local = Identity {
            user_id: UserId::new("u3"),
            email: Some("@example.org".into()),
        };
        assert_eq!(empty_local.default_display_name(), "User");
    }

    #[test]
    fn contact_debug_redacts_phone() {
        let contact = Contact {
            id: ContactId::new("local-1"),
            owner_id: UserId::new("u1"),
            name: "Mom".into(),
            phone: "+27 82 111 2222".into(),
            created_at: UnixTimeMs(0),
        };
        let rendered = format!("{contact:?}");
        assert!(!rendered.contains("111"));
        assert!(rendered.contains("[REDACTED]"));
        assert_eq!(contact.dial_digits(), "27821112222");
    }

    #[test]
    fn sos_status_serializes_lowercase() {
        let json = serde_json::to_string(&SosStatus::Active).unwrap();
        assert_eq!(json, "\"active\"");
        let parsed: SosStatus = serde_json::from_str("\"cancelled\"").unwrap();
        assert_eq!(parsed, SosStatus::Cancelled);
    }

    #[test]
    fn only_idle_accepts_press() {
        assert!(SosState::Idle.accepts_press());
        for state in [
            SosState::NoContacts,
            SosState::Holding,
            SosState::Dispatching,
            SosState::Success,
        ] {
            assert!(!state.accepts_press(), "{state:?} must ignore presses");
        }
    }

    #[test]
    fn dispatch_progress_counts_contacts_reached() {
        let mut progress = DispatchProgress::new(RunId(1), 2, 4);
        progress.record(0, true);
        progress.record(0, false);
        progress.record(1, false);
        assert_eq!(progress.contacts_reached(), 1);
        assert_eq!(progress.contacts_total(), 2);
        assert!(!progress.is_settled());
        progress.cancelled = 1;
        assert!(progress.is_settled());
    }

    #[test]
    fn failure_notice_distinguishes_causes() {
        let denied = FailureNotice::from_location(LocationError::Denied);
        assert_eq!(denied.message, SOS_FAILURE_MESSAGE);
        assert!(denied.hint.contains("enable location permissions"));
        assert!(!denied.error.is_retryable);

        let timeout = FailureNotice::from_location(LocationError::Timeout { timeout_ms: 10_000 });
        assert!(timeout.hint.contains("try again"));
        assert!(timeout.error.is_retryable);
    }
}
