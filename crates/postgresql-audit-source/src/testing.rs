//! In-process [`AuditSource`] for tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use parking_lot::Mutex;
use serde_json::json;
use sync_core::key_from_value;

use crate::source::{AuditSource, RowCursor};
use crate::Row;

#[derive(Debug, Default)]
struct State {
    rows: BTreeMap<i64, Row>,
    delete_calls: Vec<Vec<i64>>,
    range_calls: Vec<(Option<i64>, i64)>,
    listening: Vec<String>,
    unlisten_calls: usize,
    failing_deletes: usize,
    failing_fetches: usize,
    cursor_closed: bool,
}

/// Audit table held in memory, keyed by `event_id`.
///
/// Records every delete and `LISTEN` call so tests can assert on them.
#[derive(Debug, Default)]
pub struct MemoryAuditSource {
    state: Arc<Mutex<State>>,
    key_column: String,
    hstore_columns: Vec<String>,
    ignore_cursor_filter: bool,
}

/// A complete audit row with the default column names.
pub fn audit_row(key: i64, stream: &str) -> Row {
    json!({
        "event_id": key,
        "table_name": stream,
        "action": "I",
        "action_timestamp": format!("2024-03-01T10:{:02}:{:02}Z", (key / 60) % 60, key % 60),
        "row_data": {"id": key.to_string()}
    })
    .as_object()
    .cloned()
    .unwrap_or_default()
}

impl MemoryAuditSource {
    pub fn new() -> Self {
        Self {
            key_column: "event_id".to_string(),
            ..Self::default()
        }
    }

    pub fn with_hstore_columns(mut self, columns: Vec<String>) -> Self {
        self.hstore_columns = columns;
        self
    }

    /// Return every row from cursors regardless of the lower bound.
    pub fn ignoring_cursor_filter(mut self) -> Self {
        self.ignore_cursor_filter = true;
        self
    }

    pub async fn insert_row(&self, row: Row) {
        let Some(key) = row.get(&self.key_column).and_then(key_from_value) else {
            return;
        };
        self.state.lock().rows.insert(key, row);
    }

    pub async fn row_keys(&self) -> Vec<i64> {
        self.state.lock().rows.keys().copied().collect()
    }

    /// Keys of every `delete_keys` call, in call order.
    pub async fn delete_calls(&self) -> Vec<Vec<i64>> {
        self.state.lock().delete_calls.clone()
    }

    pub async fn range_calls(&self) -> Vec<(Option<i64>, i64)> {
        self.state.lock().range_calls.clone()
    }

    pub async fn listening(&self) -> Vec<String> {
        self.state.lock().listening.clone()
    }

    pub async fn unlisten_calls(&self) -> usize {
        self.state.lock().unlisten_calls
    }

    pub async fn cursor_closed(&self) -> bool {
        self.state.lock().cursor_closed
    }

    /// Fail the next `count` delete statements.
    pub async fn fail_next_deletes(&self, count: usize) {
        self.state.lock().failing_deletes = count;
    }

    /// Fail the next `count` key lookups with a connection error.
    pub async fn fail_next_fetches(&self, count: usize) {
        self.state.lock().failing_fetches = count;
    }

    fn take_delete_failure(state: &mut State) -> Result<()> {
        if state.failing_deletes > 0 {
            state.failing_deletes -= 1;
            bail!("Injected delete failure");
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl AuditSource for MemoryAuditSource {
    async fn open_cursor(&self, since_exclusive: Option<i64>) -> Result<Box<dyn RowCursor>> {
        let mut state = self.state.lock();
        state.cursor_closed = false;
        let rows: Vec<Row> = state
            .rows
            .iter()
            .filter(|(key, _)| {
                self.ignore_cursor_filter || since_exclusive.map_or(true, |since| **key > since)
            })
            .map(|(_, row)| row.clone())
            .collect();
        Ok(Box::new(MemoryRowCursor {
            rows: rows.into_iter().collect(),
            state: self.state.clone(),
        }))
    }

    async fn fetch_by_key(&self, key: i64) -> Result<Option<Row>> {
        let mut state = self.state.lock();
        if state.failing_fetches > 0 {
            state.failing_fetches -= 1;
            bail!("Injected fetch failure: connection closed");
        }
        Ok(state.rows.get(&key).cloned())
    }

    async fn delete_keys(&self, keys: &[i64]) -> Result<u64> {
        let mut state = self.state.lock();
        state.delete_calls.push(keys.to_vec());
        Self::take_delete_failure(&mut state)?;
        let deleted = keys
            .iter()
            .filter(|key| state.rows.remove(*key).is_some())
            .count();
        Ok(deleted as u64)
    }

    async fn delete_range(&self, low_exclusive: Option<i64>, high_inclusive: i64) -> Result<u64> {
        let mut state = self.state.lock();
        state.range_calls.push((low_exclusive, high_inclusive));
        Self::take_delete_failure(&mut state)?;
        let doomed: Vec<i64> = state
            .rows
            .keys()
            .copied()
            .filter(|key| low_exclusive.map_or(true, |low| *key > low) && *key <= high_inclusive)
            .collect();
        for key in &doomed {
            state.rows.remove(key);
        }
        Ok(doomed.len() as u64)
    }

    async fn audited_streams(&self) -> Result<Vec<String>> {
        let state = self.state.lock();
        let mut streams: Vec<String> = state
            .rows
            .values()
            .filter_map(|row| row.get("table_name").and_then(|v| v.as_str()))
            .map(str::to_string)
            .collect();
        streams.sort();
        streams.dedup();
        Ok(streams)
    }

    async fn listen(&self, channels: &[&str]) -> Result<()> {
        let mut state = self.state.lock();
        state
            .listening
            .extend(channels.iter().map(|c| c.to_string()));
        Ok(())
    }

    async fn unlisten(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.listening.clear();
        state.unlisten_calls += 1;
        Ok(())
    }

    fn hstore_columns(&self) -> &[String] {
        &self.hstore_columns
    }
}

struct MemoryRowCursor {
    rows: std::collections::VecDeque<Row>,
    state: Arc<Mutex<State>>,
}

#[async_trait::async_trait]
impl RowCursor for MemoryRowCursor {
    async fn read(&mut self, max_rows: usize) -> Result<Vec<Row>> {
        let n = max_rows.min(self.rows.len());
        Ok(self.rows.drain(..n).collect())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.state.lock().cursor_closed = true;
        Ok(())
    }
}
