use futures::future::try_join_all;
use std::sync::Arc;

use crate::calendar::{normalize_email, User};
use crate::sync::document_store::{self, DocumentStore, USERS, WriteBatch};
use crate::sync::error::RemoteError;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub date_of_birth: Option<String>,
    pub location: Option<String>,
}

#[derive(Clone)]
pub struct UserRemote {
    store: Arc<dyn DocumentStore>,
}

impl UserRemote {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    fn path(user_id: &str) -> String {
        format!("{}/{}", USERS, user_id)
    }

    pub async fn save_user(&self, user: &User) -> Result<(), RemoteError> {
        if user.id.trim().is_empty() {
            return Err(RemoteError::InvalidInput("user id is empty".to_string()));
        }
        let mut stored = user.clone();
        stored.email = normalize_email(&user.email);

        let value = serde_json::to_value(&stored).map_err(document_store::StoreError::from)?;
        self.store.set(&Self::path(&user.id), value).await?;
        tracing::info!("Saved user profile {}", user.id);
        Ok(())
    }

    pub async fn get_user(&self, user_id: &str) -> Result<Option<User>, RemoteError> {
        let user = document_store::read::<User>(self.store.as_ref(), &Self::path(user_id)).await?;
        Ok(user.map(|mut u| {
            u.id = user_id.to_string();
            u
        }))
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, RemoteError> {
        let email = normalize_email(email);
        if email.is_empty() {
            return Ok(None);
        }

        let matches = self.store.find_by_child(USERS, "email", &email).await?;
        let Some((id, value)) = matches.into_iter().next() else {
            tracing::debug!("No user found for {}", email);
            return Ok(None);
        };

        let mut user: User = serde_json::from_value(value).map_err(|source| document_store::StoreError::DecodeError {
            path: Self::path(&id),
            source,
        })?;
        user.id = id;
        Ok(Some(user))
    }

    /// Fetches all users concurrently; ids with no record are skipped.
    pub async fn get_users(&self, user_ids: &[String]) -> Result<Vec<User>, RemoteError> {
        let users = try_join_all(user_ids.iter().map(|id| self.get_user(id))).await?;
        Ok(users.into_iter().flatten().collect())
    }

    pub async fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> Result<User, RemoteError> {
        let mut user = self
            .get_user(user_id)
            .await?
            .ok_or_else(|| RemoteError::InvalidInput(format!("unknown user {}", user_id)))?;

        let base = Self::path(user_id);
        let mut batch = WriteBatch::new();
        let fields = [
            ("firstName", &update.first_name, &mut user.first_name),
            ("lastName", &update.last_name, &mut user.last_name),
            ("dateOfBirth", &update.date_of_birth, &mut user.date_of_birth),
            ("location", &update.location, &mut user.location),
        ];
        for (field, value, target) in fields {
            if let Some(value) = value {
                batch.put(format!("{}/{}", base, field), value.as_str());
                *target = Some(value.clone());
            }
        }

        if !batch.is_empty() {
            self.store.update(batch).await?;
        }
        Ok(user)
    }
}
