//! In-memory ring buffer store.
//!
//! Each app gets its own `VecDeque` capped at `capacity`; the oldest line is
//! popped whenever a push overflows it. Lines are immutable once stored.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{LogStore, Result, StoreError, DEFAULT_CAPACITY};
use crate::classify::process_matches;

#[derive(Debug, Clone)]
struct StoredLine {
    text: String,
    process: Option<String>,
}

#[derive(Debug)]
pub struct RingStore {
    capacity: usize,
    apps: RwLock<HashMap<String, VecDeque<StoredLine>>>,
}

impl Default for RingStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl RingStore {
    /// A zero capacity is bumped to one.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            apps: RwLock::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of lines currently held for `app`.
    pub fn len(&self, app: &str) -> usize {
        self.apps.read().get(app).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self, app: &str) -> bool {
        self.len(app) == 0
    }

    fn push(&self, app: &str, line: StoredLine) {
        let mut apps = self.apps.write();
        let ring = apps
            .entry(app.to_string())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity.min(64)));
        ring.push_back(line);
        while ring.len() > self.capacity {
            ring.pop_front();
        }
    }

    fn latest(&self, app: &str, count: usize, process: Option<&str>) -> Result<Vec<String>> {
        let apps = self.apps.read();
        let ring = match apps.get(app) {
            Some(ring) if !ring.is_empty() => ring,
            _ => return Err(StoreError::not_found(app)),
        };

        let mut lines: Vec<String> = ring
            .iter()
            .rev()
            .filter(|line| match process {
                None => true,
                Some(filter) => line
                    .process
                    .as_deref()
                    .is_some_and(|name| process_matches(name, filter)),
            })
            .take(count)
            .map(|line| line.text.clone())
            .collect();
        lines.reverse();
        Ok(lines)
    }
}

#[async_trait]
impl LogStore for RingStore {
    async fn write(&self, app: &str, line: &str, process: Option<&str>) -> Result<()> {
        self.push(
            app,
            StoredLine {
                text: line.to_string(),
                process: process.map(str::to_string),
            },
        );
        Ok(())
    }

    async fn read(&self, app: &str, count: usize, process: Option<&str>) -> Result<Vec<String>> {
        self.latest(app, count, process)
    }

    async fn destroy(&self, app: &str) -> Result<()> {
        self.apps.write().remove(app);
        Ok(())
    }

    async fn reopen(&self) -> Result<()> {
        Ok(())
    }
}
