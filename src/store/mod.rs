//! Persistence collaborators consumed by the coordinator.
//!
//! The coordinator only ever reads instances and writes two things back:
//! the health field of an instance and individual metric points. Both
//! seams are traits so a real database can be plugged in; [`MemoryStore`]
//! is the in-process implementation used by the CLI and the tests.

mod memory;

use std::time::SystemTime;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::instance::{HealthState, Instance, InstanceStatus};

pub use memory::{MemoryStore, DEFAULT_POINTS_RETAINED};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("instance '{0}' not found")]
    NotFound(String),

    #[error("invalid page request: {0}")]
    InvalidPage(String),

    /// Failure reported by an external backing store.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// One-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub number: usize,
    pub size: usize,
}

impl Page {
    pub fn first(size: usize) -> Self {
        Self { number: 1, size }
    }

    pub fn offset(&self) -> usize {
        self.number.saturating_sub(1).saturating_mul(self.size)
    }
}

/// A single persisted numeric metric sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricPoint {
    pub instance_id: String,
    pub name: String,
    pub value: f64,
    pub timestamp: SystemTime,
}

#[async_trait]
pub trait InstanceStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Instance, StoreError>;

    /// Instances in `status`, ordered by id.
    async fn list_by_status(&self, status: InstanceStatus, page: Page) -> Result<Vec<Instance>, StoreError>;

    async fn update_health(&self, id: &str, state: HealthState, message: &str) -> Result<(), StoreError>;
}

#[async_trait]
pub trait MetricStore: Send + Sync {
    async fn create_point(&self, point: MetricPoint) -> Result<(), StoreError>;
}
