use async_trait::async_trait;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
}

/// External token verifier and account owner.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// `Ok(None)` means the token was rejected; `Err` means the provider
    /// could not be asked.
    async fn verify(&self, token: &str) -> Result<Option<Identity>, StoreError>;

    /// Removes the account. Owned rows are expected to cascade at the store.
    async fn delete_user(&self, id: Uuid) -> Result<(), StoreError>;
}
