use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::instance::{HealthState, Instance, InstanceHealth, InstanceStatus};
use crate::store::{InstanceStore, MetricPoint, MetricStore, Page, StoreError};

/// Points kept per (instance, metric) series.
pub const DEFAULT_POINTS_RETAINED: usize = 120;

type SeriesKey = (String, String);

struct Inner {
    instances: BTreeMap<String, Instance>,
    series: HashMap<SeriesKey, VecDeque<MetricPoint>>,
}

/// In-process instance inventory and bounded metric history.
///
/// Cloning yields another handle to the same data.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
    retained: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_POINTS_RETAINED)
    }

    pub fn with_retention(retained: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                instances: BTreeMap::new(),
                series: HashMap::new(),
            })),
            retained: retained.max(1),
        }
    }

    pub fn from_instances(instances: impl IntoIterator<Item = Instance>) -> Self {
        let store = Self::new();
        for instance in instances {
            store.insert(instance);
        }
        store
    }

    /// Insert or replace an instance, returning the previous definition.
    pub fn insert(&self, instance: Instance) -> Option<Instance> {
        self.inner.write().instances.insert(instance.id.clone(), instance)
    }

    pub fn remove(&self, id: &str) -> Option<Instance> {
        let mut inner = self.inner.write();
        inner.series.retain(|(instance_id, _), _| instance_id != id);
        inner.instances.remove(id)
    }

    pub fn set_status(&self, id: &str, status: InstanceStatus) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let instance = inner
            .instances
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        instance.status = status;
        Ok(())
    }

    /// Every instance, ordered by id.
    pub fn instances(&self) -> Vec<Instance> {
        self.inner.read().instances.values().cloned().collect()
    }

    pub fn health(&self, id: &str) -> Option<InstanceHealth> {
        self.inner.read().instances.get(id).map(|i| i.health.clone())
    }

    /// Retained points of one series, oldest first.
    pub fn points(&self, instance_id: &str, name: &str) -> Vec<MetricPoint> {
        self.inner
            .read()
            .series
            .get(&(instance_id.to_string(), name.to_string()))
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Most recent value of every series recorded for `instance_id`.
    pub fn latest(&self, instance_id: &str) -> BTreeMap<String, f64> {
        self.inner
            .read()
            .series
            .iter()
            .filter(|((id, _), _)| id == instance_id)
            .filter_map(|((_, name), points)| points.back().map(|p| (name.clone(), p.value)))
            .collect()
    }

    pub fn point_count(&self) -> usize {
        self.inner.read().series.values().map(VecDeque::len).sum()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InstanceStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Instance, StoreError> {
        self.inner
            .read()
            .instances
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn list_by_status(&self, status: InstanceStatus, page: Page) -> Result<Vec<Instance>, StoreError> {
        if page.number == 0 || page.size == 0 {
            return Err(StoreError::InvalidPage(format!(
                "page {} of size {}",
                page.number, page.size
            )));
        }
        Ok(self
            .inner
            .read()
            .instances
            .values()
            .filter(|i| i.status == status)
            .skip(page.offset())
            .take(page.size)
            .cloned()
            .collect())
    }

    async fn update_health(&self, id: &str, state: HealthState, message: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let instance = inner
            .instances
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        instance.health = InstanceHealth {
            state,
            message: message.to_string(),
            checked_at: Some(SystemTime::now()),
        };
        Ok(())
    }
}

#[async_trait]
impl MetricStore for MemoryStore {
    async fn create_point(&self, point: MetricPoint) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if !inner.instances.contains_key(&point.instance_id) {
            return Err(StoreError::NotFound(point.instance_id));
        }
        let series = inner
            .series
            .entry((point.instance_id.clone(), point.name.clone()))
            .or_default();
        if series.len() == self.retained {
            series.pop_front();
        }
        series.push_back(point);
        Ok(())
    }
}
