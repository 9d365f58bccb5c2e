use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Observation produced by the status source for one external identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub external_id: i64,
    pub online: bool,
}

impl StatusRecord {
    pub fn new(external_id: i64, online: bool) -> Self {
        Self {
            external_id,
            online,
        }
    }
}

/// Persisted user row. `id` and `created_at` are assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct UserEntity {
    pub id: i64,
    pub external_id: i64,
    pub online: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl UserEntity {
    /// Timestamp the sweeper ages this row by.
    pub fn freshness(&self) -> DateTime<Utc> {
        self.last_seen.unwrap_or(self.created_at)
    }
}

/// Insert payload; carries no surrogate key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewUser {
    pub external_id: i64,
    pub online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

/// What the upsert engine reports back to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub id: i64,
    pub external_id: i64,
    pub online: bool,
}

impl From<&UserEntity> for UpsertOutcome {
    fn from(user: &UserEntity) -> Self {
        Self {
            id: user.id,
            external_id: user.external_id,
            online: user.online,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchRequest {
    pub object_ids: Vec<i64>,
}

/// Wire shape of the status source response. `id` is optional; when present
/// it must match the identifier that was asked for.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusPayload {
    #[serde(default)]
    pub id: Option<i64>,
    pub online: bool,
}

#[derive(Debug, Serialize)]
pub struct ApiMessage {
    pub message: String,
}
