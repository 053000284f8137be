use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument};

use crate::capabilities::{Clock, KeyNamespace, KvError, KvStore, TypedKvStore};
use crate::model::{Identity, Owner, Profile, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProfileError {
    #[error("profile storage failed: {0}")]
    Storage(#[from] KvError),
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get(&self, owner: &UserId) -> Result<Option<Profile>, ProfileError>;
    async fn put(&self, profile: &Profile) -> Result<(), ProfileError>;
}

#[derive(Clone)]
pub struct KvProfileStore {
    store: TypedKvStore<Profile>,
}

impl KvProfileStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            store: TypedKvStore::new(kv, KeyNamespace::Profile),
        }
    }

    fn owner_key(owner: &UserId) -> String {
        blake3::hash(owner.as_str().as_bytes()).to_hex()[..16].to_string()
    }
}

#[async_trait]
impl ProfileStore for KvProfileStore {
    async fn get(&self, owner: &UserId) -> Result<Option<Profile>, ProfileError> {
        Ok(self.store.load(&Self::owner_key(owner)).await?)
    }

    async fn put(&self, profile: &Profile) -> Result<(), ProfileError> {
        self.store.save(&Self::owner_key(&profile.id), profile).await?;
        Ok(())
    }
}

/// Loads the owner's profile, creating and persisting a default one on first
/// use. The default display name is the local part of the sign-in email.
#[instrument(skip_all, fields(owner = %identity.user_id))]
pub async fn resolve_owner(
    store: &dyn ProfileStore,
    identity: &Identity,
    clock: &dyn Clock,
) -> Result<Owner, ProfileError> {
    if let Some(profile) = store.get(&identity.user_id).await? {
        return Ok(Owner::from_profile(&profile));
    }

    let profile = Profile {
        id: identity.user_id.clone(),
        full_name: identity.default_display_name(),
        phone_number: None,
        created_at: clock.now(),
    };
    store.put(&profile).await?;
    info!("default profile created");
    Ok(Owner::from_profile(&profile))
}
