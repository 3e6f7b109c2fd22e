//! Tool list caching.
//!
//! The engine's tool list changes rarely, so it is fetched once and reused
//! until the entry is older than the configured TTL. The cache is shared with
//! [`ConnectionManager`], which drops it on disconnect.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use debrief_commons::SharedClock;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, warn};

use crate::connection::ConnectionManager;
use crate::error::{CalcError, CalcResult};
use crate::models::ToolDescriptor;

#[derive(Debug, Clone)]
struct ToolCacheEntry {
    tools: Arc<Vec<ToolDescriptor>>,
    fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub refreshes: u64,
    pub invalidations: u64,
}

/// TTL cache holding the most recent tool list.
pub struct ToolCache {
    entry: RwLock<Option<ToolCacheEntry>>,
    stats: Mutex<CacheStats>,
    ttl: Duration,
    clock: SharedClock,
}

impl ToolCache {
    pub fn new(ttl: Duration, clock: SharedClock) -> Self {
        Self {
            entry: RwLock::new(None),
            stats: Mutex::new(CacheStats::default()),
            ttl,
            clock,
        }
    }

    /// Cached tools if the entry is younger than the TTL.
    pub fn fresh(&self) -> Option<Arc<Vec<ToolDescriptor>>> {
        let fresh = self
            .entry
            .read()
            .as_ref()
            .filter(|entry| self.clock.elapsed_since(entry.fetched_at) < self.ttl)
            .map(|entry| Arc::clone(&entry.tools));

        let mut stats = self.stats.lock();
        if fresh.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        fresh
    }

    /// Replace the entry wholesale.
    pub fn store(&self, tools: Vec<ToolDescriptor>) -> Arc<Vec<ToolDescriptor>> {
        let tools = Arc::new(tools);
        *self.entry.write() = Some(ToolCacheEntry {
            tools: Arc::clone(&tools),
            fetched_at: self.clock.now(),
        });
        self.stats.lock().refreshes += 1;
        tools
    }

    pub fn invalidate(&self) {
        if self.entry.write().take().is_some() {
            self.stats.lock().invalidations += 1;
            debug!("tool cache invalidated");
        }
    }

    /// Cached tools regardless of age.
    pub fn snapshot(&self) -> Option<Arc<Vec<ToolDescriptor>>> {
        self.entry
            .read()
            .as_ref()
            .map(|entry| Arc::clone(&entry.tools))
    }

    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.entry.read().as_ref().map(|entry| entry.fetched_at)
    }

    pub fn stats(&self) -> CacheStats {
        *self.stats.lock()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl std::fmt::Debug for ToolCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCache")
            .field("ttl", &self.ttl)
            .field("fetched_at", &self.fetched_at())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Cache-or-fetch access to the engine's tools.
#[derive(Debug)]
pub struct ToolCatalog {
    connection: Arc<ConnectionManager>,
    cache: Arc<ToolCache>,
}

impl ToolCatalog {
    pub fn new(connection: Arc<ConnectionManager>) -> Self {
        let cache = connection.tool_cache();
        Self { connection, cache }
    }

    /// Return the cached list while fresh, otherwise connect and refetch.
    ///
    /// A failed fetch is recorded against the breaker and leaves the cache
    /// as it was.
    pub async fn list_tools(&self) -> CalcResult<Vec<ToolDescriptor>> {
        if let Some(tools) = self.cache.fresh() {
            debug!(count = tools.len(), "tool cache hit");
            return Ok(tools.as_ref().clone());
        }

        self.connection.connect().await?;

        match self.connection.engine().list_tools().await {
            Ok(tools) => {
                debug!(count = tools.len(), "tool cache refreshed");
                Ok(self.cache.store(tools).as_ref().clone())
            }
            Err(err) => {
                let message = format!("{err:#}");
                warn!(error = %message, "failed to fetch analysis tools");
                self.connection.record_failure();
                Err(CalcError::ToolFetch(message))
            }
        }
    }

    pub fn invalidate(&self) {
        self.cache.invalidate();
    }

    /// Tools from the last successful fetch, stale or not.
    pub fn cached_tools(&self) -> Vec<ToolDescriptor> {
        self.cache
            .snapshot()
            .map(|tools| tools.as_ref().clone())
            .unwrap_or_default()
    }

    pub fn find(&self, name: &str) -> Option<ToolDescriptor> {
        self.cache
            .snapshot()?
            .iter()
            .find(|tool| tool.name == name)
            .cloned()
    }

    pub fn cache(&self) -> &ToolCache {
        &self.cache
    }
}
