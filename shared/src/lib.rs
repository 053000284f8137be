//! SafeHive shared core.
//!
//! Platform-independent SOS logic embedded by the mobile and web shells: the
//! hold-to-trigger state machine, alert composition, the staggered
//! call/message fan-out, and the bounded local history of triggered alerts.
//! Every platform facility is reached through [`Capabilities`], and every
//! persistent store is injected through [`Stores`].

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

pub mod capabilities;
pub mod composer;
pub mod config;
pub mod contacts;
pub mod controller;
pub mod dispatch;
pub mod event;
pub mod history;
pub mod hold;
pub mod model;
pub mod profile;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use capabilities::{
    Capabilities, ChannelAction, ChannelError, ChannelInvoker, ChannelKind, Clock, FixRequest,
    GeolocationProvider, Haptics, KvError, KvStore, LocationError, LocationProvider,
    MemoryKvStore, PlatformGeolocation, SystemClock, VibrationPattern,
};
#[cfg(not(target_arch = "wasm32"))]
pub use capabilities::SqliteKvStore;
pub use composer::{AlertComposer, ComposedAlert};
pub use config::{ConfigError, SosConfig};
pub use contacts::{ContactError, ContactStore, KvContactStore, NewContact};
pub use controller::{SosController, SosHandle, Stores};
pub use dispatch::{
    normalize_phone, DispatchRun, DispatchScheduler, InvocationReport, PlannedInvocation, RunId,
};
pub use event::Event;
pub use history::{EventLog, HistoryError};
pub use hold::{HoldGesture, HoldSignal};
pub use model::{
    Contact, ContactId, CoordinateError, DispatchProgress, FailureNotice, Identity, LocationFix,
    Owner, Profile, SessionId, SosEvent, SosState, SosStatus, SosView, TriggerPhase,
    TriggerSession, UserId,
};
pub use profile::{resolve_owner, KvProfileStore, ProfileError, ProfileStore};

pub const HOLD_THRESHOLD_MS: u64 = 3_000;
pub const HOLD_TICK_MS: u64 = 50;
pub const LOCATION_TIMEOUT_MS: u64 = 10_000;
pub const CONTACT_STAGGER_MS: u64 = 4_000;
pub const MESSAGE_OFFSET_MS: u64 = 2_000;
pub const SUCCESS_WINDOW_MS: u64 = 3_000;
pub const MAX_HISTORY_ENTRIES: usize = 50;
pub const MAX_CONTACTS_PER_OWNER: usize = 5;
pub const PRESS_VIBRATION_MS: u64 = 200;
pub const TRIGGER_VIBRATION_PATTERN_MS: &[u64] = &[200, 100, 200, 100, 200];
pub const DEFAULT_MAP_BASE_URL: &str = "https://www.google.com/maps";
pub const DEFAULT_MESSAGE_BASE_URL: &str = "https://wa.me";
pub const DEFAULT_APP_NAME: &str = "SAFEHIVE";
pub const DEFAULT_DISPLAY_NAME: &str = "User";

pub const SOS_FAILURE_MESSAGE: &str =
    "Failed to send SOS. Please try again or call emergency services directly.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Transient,
    Permanent,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Validation,
    CapacityExceeded,
    Storage,
    Serialization,
    Location,
    LocationTimeout,
    LocationPermissionDenied,
    ChannelInvocation,
    Configuration,
    InvalidState,
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION_ERROR",
            Self::CapacityExceeded => "CAPACITY_EXCEEDED",
            Self::Storage => "STORAGE_ERROR",
            Self::Serialization => "SERIALIZATION_ERROR",
            Self::Location => "LOCATION_UNAVAILABLE",
            Self::LocationTimeout => "LOCATION_TIMEOUT",
            Self::LocationPermissionDenied => "LOCATION_PERMISSION_DENIED",
            Self::ChannelInvocation => "CHANNEL_INVOCATION_FAILED",
            Self::Configuration => "CONFIGURATION_ERROR",
            Self::InvalidState => "INVALID_STATE",
            Self::Internal => "INTERNAL_ERROR",
        }
    }

    #[must_use]
    pub const fn default_severity(self) -> ErrorSeverity {
        match self {
            Self::Storage | Self::Location | Self::LocationTimeout | Self::ChannelInvocation => {
                ErrorSeverity::Transient
            }

            Self::Serialization | Self::Configuration | Self::InvalidState | Self::Internal => {
                ErrorSeverity::Fatal
            }

            Self::Validation | Self::CapacityExceeded | Self::LocationPermissionDenied => {
                ErrorSeverity::Permanent
            }
        }
    }

    /// Whether the user can reasonably try again by hand. The core itself
    /// never retries.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Storage | Self::Location | Self::LocationTimeout | Self::ChannelInvocation
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppError {
    pub kind: ErrorKind,
    pub severity: ErrorSeverity,
    pub message: String,
    pub internal_message: Option<String>,
    pub context: HashMap<String, String>,
}

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            message: message.into(),
            internal_message: None,
            context: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_internal(mut self, internal: impl Into<String>) -> Self {
        self.internal_message = Some(internal.into());
        self
    }

    #[must_use]
    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable() && !matches!(self.severity, ErrorSeverity::Fatal)
    }

    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self.kind {
            ErrorKind::Validation => self.message.clone(),
            ErrorKind::CapacityExceeded => format!(
                "Maximum {MAX_CONTACTS_PER_OWNER} emergency contacts allowed"
            ),
            ErrorKind::Storage => {
                "Unable to save data on this device. Please free up some storage space.".into()
            }
            ErrorKind::Serialization => {
                "Saved data could not be read. Please contact support if this persists.".into()
            }
            ErrorKind::Location => {
                "Unable to determine your location. Please check your GPS settings.".into()
            }
            ErrorKind::LocationTimeout => {
                "Getting your location took too long. Please try again.".into()
            }
            ErrorKind::LocationPermissionDenied => {
                "Location access is required. Please enable location permissions in Settings."
                    .into()
            }
            ErrorKind::ChannelInvocation => {
                "Could not open the phone or messaging app on this device.".into()
            }
            ErrorKind::Configuration | ErrorKind::InvalidState => {
                "The app is in an invalid state. Please restart the app.".into()
            }
            ErrorKind::Internal => {
                "An unexpected error occurred. Please try again or contact support.".into()
            }
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)?;
        if let Some(internal) = &self.internal_message {
            write!(f, " (internal: {internal})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<LocationError> for AppError {
    fn from(err: LocationError) -> Self {
        let kind = match &err {
            LocationError::Unavailable { .. } => ErrorKind::Location,
            LocationError::Timeout { .. } => ErrorKind::LocationTimeout,
            LocationError::Denied => ErrorKind::LocationPermissionDenied,
        };
        AppError::new(kind, err.to_string())
    }
}

impl From<KvError> for AppError {
    fn from(err: KvError) -> Self {
        let kind = match &err {
            KvError::Serialization { .. } => ErrorKind::Serialization,
            KvError::InvalidKey { .. } => ErrorKind::Internal,
            KvError::ValueTooLarge { .. } | KvError::Storage { .. } => ErrorKind::Storage,
        };
        let severity = if err.is_retryable() {
            ErrorSeverity::Transient
        } else {
            kind.default_severity()
        };
        AppError::new(kind, err.to_string()).with_severity(severity)
    }
}

impl From<ContactError> for AppError {
    fn from(err: ContactError) -> Self {
        match err {
            ContactError::CapacityExceeded { max } => {
                AppError::new(ErrorKind::CapacityExceeded, err.to_string())
                    .with_context("max_contacts", max.to_string())
            }
            ContactError::Validation { field, reason } => {
                AppError::new(ErrorKind::Validation, reason).with_context("field", field)
            }
            ContactError::Storage(kv) => kv.into(),
        }
    }
}

impl From<HistoryError> for AppError {
    fn from(err: HistoryError) -> Self {
        match err {
            HistoryError::Storage(kv) => kv.into(),
        }
    }
}

impl From<ProfileError> for AppError {
    fn from(err: ProfileError) -> Self {
        match err {
            ProfileError::Storage(kv) => kv.into(),
        }
    }
}

impl From<ChannelError> for AppError {
    fn from(err: ChannelError) -> Self {
        AppError::new(ErrorKind::ChannelInvocation, err.to_string())
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::new(ErrorKind::Configuration, err.to_string())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UserFacingError {
    pub message: String,
    pub is_transient: bool,
    pub is_retryable: bool,
    pub error_code: String,
}

impl From<&AppError> for UserFacingError {
    fn from(e: &AppError) -> Self {
        Self {
            message: e.user_facing_message(),
            is_transient: e.severity == ErrorSeverity::Transient,
            is_retryable: e.is_retryable(),
            error_code: e.code().to_string(),
        }
    }
}

#[must_use]
pub fn get_current_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnixTimeMs(pub u64);

impl UnixTimeMs {
    #[must_use]
    pub fn now() -> Self {
        Self(get_current_time_ms())
    }

    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }
}
