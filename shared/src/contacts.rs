//! Emergency contacts, at most `max_contacts` per owner.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::capabilities::{Clock, KeyNamespace, KvError, KvStore, SystemClock, TypedKvStore};
use crate::model::{Contact, ContactId, UserId};
use crate::MAX_CONTACTS_PER_OWNER;

const MAX_NAME_LENGTH: usize = 100;
const MAX_PHONE_LENGTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContactError {
    #[error("contact limit of {max} reached")]
    CapacityExceeded { max: usize },

    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("contact storage failed: {0}")]
    Storage(#[from] KvError),
}

impl ContactError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// User input for a new contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewContact {
    pub name: String,
    pub phone: String,
}

impl NewContact {
    pub fn new(name: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phone: phone.into(),
        }
    }

    /// Trims both fields and rejects unusable values.
    pub fn validate(self) -> Result<Self, ContactError> {
        let name = self.name.trim().to_string();
        let phone = self.phone.trim().to_string();

        if name.is_empty() {
            return Err(ContactError::invalid("name", "name is required"));
        }
        if name.chars().count() > MAX_NAME_LENGTH {
            return Err(ContactError::invalid(
                "name",
                format!("name must be at most {MAX_NAME_LENGTH} characters"),
            ));
        }
        if phone.is_empty() {
            return Err(ContactError::invalid("phone", "phone number is required"));
        }
        if phone.chars().count() > MAX_PHONE_LENGTH {
            return Err(ContactError::invalid(
                "phone",
                format!("phone number must be at most {MAX_PHONE_LENGTH} characters"),
            ));
        }
        if !phone.chars().any(|c| c.is_ascii_digit()) {
            return Err(ContactError::invalid(
                "phone",
                "phone number must contain digits",
            ));
        }
        Ok(Self { name, phone })
    }
}

#[async_trait]
pub trait ContactStore: Send + Sync {
    /// Contacts of `owner` in insertion order.
    async fn list(&self, owner: &UserId) -> Result<Vec<Contact>, ContactError>;

    async fn add(&self, owner: &UserId, contact: NewContact) -> Result<Contact, ContactError>;

    /// Returns false when `id` is not one of the owner's contacts.
    async fn remove(&self, owner: &UserId, id: &ContactId) -> Result<bool, ContactError>;
}

/// [`ContactStore`] over a [`KvStore`], one JSON array per owner.
#[derive(Clone)]
pub struct KvContactStore {
    store: TypedKvStore<Vec<Contact>>,
    max_contacts: usize,
    clock: Arc<dyn Clock>,
}

impl KvContactStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            store: TypedKvStore::new(kv, KeyNamespace::Contacts),
            max_contacts: MAX_CONTACTS_PER_OWNER,
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_max_contacts(mut self, max_contacts: usize) -> Self {
        self.max_contacts = max_contacts;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Owner ids are opaque strings from the auth provider; hashing keeps them
    /// out of storage keys and within the key charset.
    fn owner_key(owner: &UserId) -> String {
        let hash = blake3::hash(owner.as_str().as_bytes());
        hash.to_hex()[..16].to_string()
    }
}

#[async_trait]
impl ContactStore for KvContactStore {
    async fn list(&self, owner: &UserId) -> Result<Vec<Contact>, ContactError> {
        Ok(self
            .store
            .load(&Self::owner_key(owner))
            .await?
            .unwrap_or_default())
    }

    #[instrument(skip_all, fields(owner = %owner))]
    async fn add(&self, owner: &UserId, contact: NewContact) -> Result<Contact, ContactError> {
        let contact = contact.validate()?;
        let key = Self::owner_key(owner);
        let mut contacts = self.store.load(&key).await?.unwrap_or_default();

        if contacts.len() >= self.max_contacts {
            warn!(count = contacts.len(), max = self.max_contacts, "contact limit reached");
            return Err(ContactError::CapacityExceeded {
                max: self.max_contacts,
            });
        }

        let created = Contact {
            id: ContactId::generate(),
            owner_id: owner.clone(),
            name: contact.name,
            phone: contact.phone,
            created_at: self.clock.now(),
        };
        contacts.push(created.clone());
        self.store.save(&key, &contacts).await?;
        info!(contact_id = %created.id, count = contacts.len(), "contact added");
        Ok(created)
    }

    #[instrument(skip_all, fields(owner = %owner, contact_id = %id))]
    async fn remove(&self, owner: &UserId, id: &ContactId) -> Result<bool, ContactError> {
        let key = Self::owner_key(owner);
        let mut contacts = self.store.load(&key).await?.unwrap_or_default();
        let before = contacts.len();
        contacts.retain(|c| &c.id != id);
        if contacts.len() == before {
            return Ok(false);
        }
        self.store.save(&key, &contacts).await?;
        info!(count = contacts.len(), "contact removed");
        Ok(true)
    }
}
