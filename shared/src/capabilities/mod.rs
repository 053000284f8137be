mod channel;
mod device;
pub mod kv;
mod location;
#[cfg(not(target_arch = "wasm32"))]
mod sqlite;

use std::sync::Arc;

pub use self::channel::{ChannelAction, ChannelError, ChannelInvoker, ChannelKind};
pub use self::device::{Clock, Haptics, SystemClock, VibrationPattern};
pub use self::kv::{KeyNamespace, KvError, KvKey, KvStore, MemoryKvStore, TypedKvStore};
pub use self::location::{
    FixRequest, GeolocationProvider, LocationError, LocationProvider, PlatformFailure,
    PlatformGeolocation, PlatformReading,
};
#[cfg(not(target_arch = "wasm32"))]
pub use self::sqlite::SqliteKvStore;

/// Platform facilities the shell bridges into the core.
#[derive(Clone)]
pub struct Capabilities {
    pub location: Arc<dyn LocationProvider>,
    pub channels: Arc<dyn ChannelInvoker>,
    /// `None` on platforms without a vibration motor.
    pub haptics: Option<Arc<dyn Haptics>>,
    pub clock: Arc<dyn Clock>,
}

impl Capabilities {
    pub fn new(location: Arc<dyn LocationProvider>, channels: Arc<dyn ChannelInvoker>) -> Self {
        Self {
            location,
            channels,
            haptics: None,
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_haptics(mut self, haptics: Arc<dyn Haptics>) -> Self {
        self.haptics = Some(haptics);
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn vibrate(&self, pattern: &VibrationPattern) {
        if let Some(haptics) = &self.haptics {
            haptics.vibrate(pattern);
        }
    }
}
