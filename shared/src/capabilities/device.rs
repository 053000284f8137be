use serde::{Deserialize, Serialize};

use crate::UnixTimeMs;

/// Alternating on/off durations in milliseconds, starting with "on".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VibrationPattern(pub Vec<u64>);

impl VibrationPattern {
    #[must_use]
    pub fn pulse(ms: u64) -> Self {
        Self(vec![ms])
    }
}

pub trait Haptics: Send + Sync {
    fn vibrate(&self, pattern: &VibrationPattern);
}

pub trait Clock: Send + Sync {
    fn now(&self) -> UnixTimeMs;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> UnixTimeMs {
        UnixTimeMs::now()
    }
}
