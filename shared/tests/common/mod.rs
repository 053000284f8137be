#![allow(dead_code)]

use async_trait::async_trait;
use shared::{
    Capabilities, ChannelAction, ChannelError, ChannelInvoker, Clock, FixRequest, Identity,
    KvStore, LocationError, LocationFix, LocationProvider, MemoryKvStore, NewContact, SosConfig,
    SosController, SosHandle, Stores, UnixTimeMs, UserId,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

pub struct StaticLocation(pub Result<LocationFix, LocationError>);

#[async_trait]
impl LocationProvider for StaticLocation {
    async fn get_fix(&self, _request: &FixRequest) -> Result<LocationFix, LocationError> {
        self.0.clone()
    }
}

/// Never answers; only the controller's own timeout ends the lookup.
pub struct SilentLocation;

#[async_trait]
impl LocationProvider for SilentLocation {
    async fn get_fix(&self, _request: &FixRequest) -> Result<LocationFix, LocationError> {
        tokio::time::sleep(Duration::from_secs(3_600)).await;
        Err(LocationError::Unavailable {
            reason: "no satellites".into(),
        })
    }
}

#[derive(Default)]
pub struct ChannelLog {
    entries: Mutex<Vec<(Instant, ChannelAction)>>,
}

impl ChannelLog {
    pub fn urls(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(_, a)| a.url.clone())
            .collect()
    }

    pub fn offsets_from(&self, origin: Instant) -> Vec<u128> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(at, _)| at.duration_since(origin).as_millis())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[async_trait]
impl ChannelInvoker for ChannelLog {
    async fn invoke(&self, action: &ChannelAction) -> Result<(), ChannelError> {
        self.entries
            .lock()
            .unwrap()
            .push((Instant::now(), action.clone()));
        Ok(())
    }
}

pub struct StoppedClock;

impl Clock for StoppedClock {
    fn now(&self) -> UnixTimeMs {
        UnixTimeMs(1_717_171_717_000)
    }
}

pub fn johannesburg() -> LocationFix {
    LocationFix::new(-26.2041, 28.0473).unwrap()
}

pub fn identity() -> Identity {
    Identity {
        user_id: UserId::new("auth0|lerato"),
        email: Some("lerato@example.org".into()),
    }
}

pub struct App {
    pub handle: SosHandle,
    pub channels: Arc<ChannelLog>,
    pub kv: Arc<MemoryKvStore>,
}

pub async fn start_app(location: Arc<dyn LocationProvider>, phones: &[&str]) -> App {
    let config = SosConfig::default();
    let kv = Arc::new(MemoryKvStore::new());
    let channels = Arc::new(ChannelLog::default());
    let caps = Capabilities::new(location, Arc::clone(&channels) as Arc<dyn ChannelInvoker>)
        .with_clock(Arc::new(StoppedClock));
    let stores = Stores::over_kv(Arc::clone(&kv) as Arc<dyn KvStore>, &config);

    let handle = SosController::start(config, caps, stores, &identity())
        .await
        .unwrap();
    for (i, phone) in phones.iter().enumerate() {
        handle
            .add_contact(NewContact::new(format!("Contact {i}"), *phone))
            .await
            .unwrap();
    }
    App {
        handle,
        channels,
        kv,
    }
}

pub fn assert_offsets(actual: &[u128], expected: &[u128]) {
    assert_eq!(actual.len(), expected.len(), "{actual:?} vs {expected:?}");
    for (a, e) in actual.iter().zip(expected) {
        assert!(a.abs_diff(*e) <= 1, "{actual:?} vs {expected:?}");
    }
}
