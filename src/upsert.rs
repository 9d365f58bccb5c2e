use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::{
    error::{AppError, AppResult},
    models::{NewUser, StatusRecord, UpsertOutcome},
    repository::UserRepository,
};

/// Applies status observations to the store.
///
/// `last_seen` only moves when the observation says online; an offline
/// observation never touches it, so a user that stays offline ages out
/// through the sweeper. The store refuses to move `last_seen` backwards, so
/// an offline write based on an older read keeps a newer online stamp.
#[derive(Clone)]
pub struct UpsertEngine {
    repo: Arc<dyn UserRepository>,
}

impl UpsertEngine {
    pub fn new(repo: Arc<dyn UserRepository>) -> Self {
        Self { repo }
    }

    pub async fn add_or_update(&self, record: StatusRecord) -> AppResult<UpsertOutcome> {
        let existing = self
            .repo
            .find_by_external_id(record.external_id)
            .await
            .inspect_err(|err| {
                warn!(external_id = record.external_id, error = %err, "user lookup failed");
            })?;

        let stamp = record.online.then(Utc::now);

        let Some(mut user) = existing else {
            let created = self
                .repo
                .create(NewUser {
                    external_id: record.external_id,
                    online: record.online,
                    last_seen: stamp,
                })
                .await
                .inspect_err(|err| {
                    warn!(external_id = record.external_id, error = %err, "user create failed");
                })?;
            debug!(
                id = created.id,
                external_id = created.external_id,
                online = created.online,
                "user created"
            );
            return Ok(UpsertOutcome::from(&created));
        };

        user.online = record.online;
        if stamp.is_some() {
            user.last_seen = stamp;
        }

        let updated = self
            .repo
            .update(&user)
            .await
            .inspect_err(|err| {
                warn!(external_id = record.external_id, error = %err, "user update failed");
            })?
            .ok_or_else(|| {
                warn!(
                    id = user.id,
                    external_id = record.external_id,
                    "user vanished before update"
                );
                AppError::not_found(format!("user {} removed during update", record.external_id))
            })?;

        debug!(
            id = updated.id,
            external_id = updated.external_id,
            online = updated.online,
            "user updated"
        );
        Ok(UpsertOutcome::from(&updated))
    }
}
