//! Status source client.
//!
//! One `GET <base-url>/<id>` per identifier. Every failure here is a soft
//! failure for the caller: the identifier is dropped from the batch.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::{
    error::{AppError, AppResult},
    models::{StatusPayload, StatusRecord},
};

#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch(&self, external_id: i64) -> AppResult<StatusRecord>;
}

pub struct HttpStatusSource {
    base_url: String,
    client: reqwest::Client,
}

impl HttpStatusSource {
    pub fn new(base_url: &str, request_timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;

        Ok(Self::with_client(base_url, client))
    }

    pub fn with_client(base_url: &str, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    fn url_for(&self, external_id: i64) -> String {
        format!("{}/{}", self.base_url, external_id)
    }
}

#[async_trait]
impl StatusSource for HttpStatusSource {
    async fn fetch(&self, external_id: i64) -> AppResult<StatusRecord> {
        let url = self.url_for(external_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?;

        let body = response.bytes().await?;
        let payload: StatusPayload = serde_json::from_slice(&body)
            .map_err(|err| AppError::decode(format!("{url}: {err}")))?;

        let record = to_record(external_id, payload)?;
        debug!(external_id, online = record.online, "status fetched");
        Ok(record)
    }
}

fn to_record(requested: i64, payload: StatusPayload) -> AppResult<StatusRecord> {
    match payload.id {
        Some(reported) if reported != requested => Err(AppError::decode(format!(
            "asked for {requested}, status source answered for {reported}"
        ))),
        _ => Ok(StatusRecord::new(requested, payload.online)),
    }
}
