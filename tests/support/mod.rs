//! Shared fakes for the integration tests.

#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use presence_aggregator::{
    Aggregator, AggregatorSettings, AppError, AppResult, InMemoryUserRepository, OverrunPolicy,
    StatusRecord, StatusSource, UpsertEngine, UserEntity, UserRepository, models::NewUser,
};

#[derive(Debug, Clone, Copy)]
pub enum Reply {
    Online,
    Offline,
    Fail,
}

/// Status source answering from a fixed script, with optional per-id delay.
#[derive(Default)]
pub struct ScriptedSource {
    replies: HashMap<i64, (Reply, Duration)>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, external_id: i64, reply: Reply) -> Self {
        self.replies.insert(external_id, (reply, Duration::ZERO));
        self
    }

    pub fn reply_after(mut self, external_id: i64, reply: Reply, delay: Duration) -> Self {
        self.replies.insert(external_id, (reply, delay));
        self
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusSource for ScriptedSource {
    async fn fetch(&self, external_id: i64) -> AppResult<StatusRecord> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);

        let (reply, delay) = self
            .replies
            .get(&external_id)
            .copied()
            .unwrap_or((Reply::Fail, Duration::ZERO));
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match reply {
            Reply::Online => Ok(StatusRecord::new(external_id, true)),
            Reply::Offline => Ok(StatusRecord::new(external_id, false)),
            Reply::Fail => Err(AppError::decode(format!("no script for {external_id}"))),
        }
    }
}

/// In-memory store whose lookups fail for selected external identifiers.
pub struct FlakyRepository {
    inner: InMemoryUserRepository,
    broken: HashSet<i64>,
}

impl FlakyRepository {
    pub fn failing_for(broken: impl IntoIterator<Item = i64>) -> Self {
        Self {
            inner: InMemoryUserRepository::new(),
            broken: broken.into_iter().collect(),
        }
    }
}

#[async_trait]
impl UserRepository for FlakyRepository {
    async fn init(&self) -> AppResult<()> {
        self.inner.init().await
    }

    async fn ping(&self) -> AppResult<()> {
        Err(AppError::storage("store unreachable"))
    }

    async fn find_by_external_id(&self, external_id: i64) -> AppResult<Option<UserEntity>> {
        if self.broken.contains(&external_id) {
            return Err(AppError::storage("connection reset during lookup"));
        }
        self.inner.find_by_external_id(external_id).await
    }

    async fn create(&self, user: NewUser) -> AppResult<UserEntity> {
        self.inner.create(user).await
    }

    async fn update(&self, user: &UserEntity) -> AppResult<Option<UserEntity>> {
        self.inner.update(user).await
    }

    async fn delete_seen_before(&self, cutoff: DateTime<Utc>) -> AppResult<u64> {
        self.inner.delete_seen_before(cutoff).await
    }
}

pub fn settings(
    queue_capacity: usize,
    deadline: Duration,
    overrun: OverrunPolicy,
) -> AggregatorSettings {
    AggregatorSettings {
        queue_capacity,
        deadline,
        overrun,
    }
}

pub fn aggregator(
    source: Arc<dyn StatusSource>,
    repo: Arc<dyn UserRepository>,
    settings: AggregatorSettings,
) -> Aggregator {
    Aggregator::new(source, UpsertEngine::new(repo), settings)
}
