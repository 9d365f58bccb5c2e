use std::sync::Arc;

use crate::{aggregator::Aggregator, repository::UserRepository};

#[derive(Clone)]
pub struct AppState {
    pub aggregator: Aggregator,
    pub repo: Arc<dyn UserRepository>,
}

impl AppState {
    pub fn new(aggregator: Aggregator, repo: Arc<dyn UserRepository>) -> Self {
        Self { aggregator, repo }
    }
}
