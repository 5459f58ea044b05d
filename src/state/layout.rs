//! Position allocator and durable layout cache.
//!
//! DESIGN
//! ======
//! Layout coordinates are a client concern the server never sees. They live
//! in a small key-value store keyed `entity_position_<id>`, one JSON
//! `{x, y}` per entity, so a position survives restarts and reconnects.
//!
//! A first sighting gets the first free cell of a fixed grid, checked
//! against every stored position. The allocation is written back at once,
//! which keeps later allocations in the same session apart. When the grid
//! is full a random point inside the default viewport is used instead.
//!
//! Unreadable files and malformed entries are treated as absent; write
//! failures are logged and never abort the caller.

#[cfg(test)]
#[path = "layout_test.rs"]
mod layout_test;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::Rng;
use serde_json::Value;
use tracing::{debug, warn};

use super::canvas::Position;
use crate::error::ErrorCode;

pub const POSITION_KEY_PREFIX: &str = "entity_position_";

#[must_use]
pub fn position_key(entity_id: &str) -> String {
    format!("{POSITION_KEY_PREFIX}{entity_id}")
}

// =============================================================================
// ERROR TYPE
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum LayoutError {
    #[error("layout store write failed for {path}: {message}")]
    Write { path: PathBuf, message: String },

    #[error("layout encode failed: {0}")]
    Encode(String),
}

impl ErrorCode for LayoutError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Write { .. } => "E_LAYOUT_WRITE",
            Self::Encode(_) => "E_LAYOUT_ENCODE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Write { .. })
    }
}

// =============================================================================
// STORES
// =============================================================================

/// Durable key-value backing for layout records.
pub trait LayoutStore: Send {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&mut self, key: &str, value: Value) -> Result<(), LayoutError>;
    fn remove(&mut self, key: &str) -> Result<(), LayoutError>;
    fn entries(&self) -> Vec<(String, Value)>;
}

/// In-process store for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryLayoutStore {
    entries: BTreeMap<String, Value>,
}

impl MemoryLayoutStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl LayoutStore for MemoryLayoutStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), LayoutError> {
        self.entries.insert(key.to_owned(), value);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), LayoutError> {
        self.entries.remove(key);
        Ok(())
    }

    fn entries(&self) -> Vec<(String, Value)> {
        self.entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

/// JSON-object file store. Every write rewrites the whole file.
#[derive(Debug)]
pub struct FileLayoutStore {
    path: PathBuf,
    entries: BTreeMap<String, Value>,
}

impl FileLayoutStore {
    /// Open `path`, starting empty when it is missing or unreadable.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = load_entries(&path);
        debug!(path = %path.display(), entries = entries.len(), "layout store opened");
        Self { path, entries }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<(), LayoutError> {
        let write_err = |e: std::io::Error| LayoutError::Write { path: self.path.clone(), message: e.to_string() };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let raw = serde_json::to_string_pretty(&self.entries).map_err(|e| LayoutError::Encode(e.to_string()))?;
        std::fs::write(&self.path, raw).map_err(write_err)
    }
}

fn load_entries(path: &Path) -> BTreeMap<String, Value> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "layout store unreadable; starting empty");
            return BTreeMap::new();
        }
    };
    match serde_json::from_str(&raw) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "layout store malformed; starting empty");
            BTreeMap::new()
        }
    }
}

impl LayoutStore for FileLayoutStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), LayoutError> {
        self.entries.insert(key.to_owned(), value);
        self.flush()
    }

    fn remove(&mut self, key: &str) -> Result<(), LayoutError> {
        if self.entries.remove(key).is_none() {
            return Ok(());
        }
        self.flush()
    }

    fn entries(&self) -> Vec<(String, Value)> {
        self.entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

// =============================================================================
// ALLOCATOR
// =============================================================================

/// Grid geometry for default placement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutConfig {
    pub cell_size: f64,
    pub margin: f64,
    /// Cells per side; the grid is `grid_size x grid_size`.
    pub grid_size: u32,
    /// Per-axis distance under which two positions collide.
    pub min_separation: f64,
    pub viewport_width: f64,
    pub viewport_height: f64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            cell_size: 200.0,
            margin: 100.0,
            grid_size: 10,
            min_separation: 50.0,
            viewport_width: 1200.0,
            viewport_height: 800.0,
        }
    }
}

impl LayoutConfig {
    /// First grid cell center (row-major) clear of every `occupied` point.
    #[must_use]
    pub fn first_free_cell(&self, occupied: &[Position]) -> Option<Position> {
        (0..self.grid_size)
            .flat_map(|row| (0..self.grid_size).map(move |col| (row, col)))
            .map(|(row, col)| self.cell_center(row, col))
            .find(|candidate| !occupied.iter().any(|p| self.collides(*candidate, *p)))
    }

    fn cell_center(&self, row: u32, col: u32) -> Position {
        let half = self.cell_size / 2.0;
        Position::new(
            self.margin + f64::from(col) * self.cell_size + half,
            self.margin + f64::from(row) * self.cell_size + half,
        )
    }

    fn collides(&self, a: Position, b: Position) -> bool {
        (a.x - b.x).abs() < self.min_separation && (a.y - b.y).abs() < self.min_separation
    }

    fn random_in_viewport(&self) -> Position {
        let mut rng = rand::rng();
        Position::new(
            self.margin + rng.random_range(0.0..self.viewport_width.max(1.0)),
            self.margin + rng.random_range(0.0..self.viewport_height.max(1.0)),
        )
    }
}

/// Position cache shared by the reducer and the mutation coordinator.
pub struct PositionCache {
    store: Mutex<Box<dyn LayoutStore>>,
    config: LayoutConfig,
}

impl PositionCache {
    #[must_use]
    pub fn new(store: Box<dyn LayoutStore>, config: LayoutConfig) -> Self {
        Self { store: Mutex::new(store), config }
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryLayoutStore::new()), LayoutConfig::default())
    }

    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::new(Box::new(FileLayoutStore::open(path)), LayoutConfig::default())
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn LayoutStore>> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stored position for `entity_id`, or a freshly allocated and persisted one.
    #[must_use]
    pub fn position_for(&self, entity_id: &str) -> Position {
        let mut store = self.lock();
        let key = position_key(entity_id);
        if let Some(position) = store.get(&key).and_then(decode_position) {
            return position;
        }

        let occupied: Vec<Position> = store
            .entries()
            .into_iter()
            .filter(|(k, _)| k.starts_with(POSITION_KEY_PREFIX))
            .filter_map(|(_, v)| decode_position(v))
            .collect();
        let position = self.config.first_free_cell(&occupied).unwrap_or_else(|| {
            debug!(entity_id, "layout grid exhausted; using random placement");
            self.config.random_in_viewport()
        });

        persist(&mut **store, &key, position);
        position
    }

    #[must_use]
    pub fn stored_position(&self, entity_id: &str) -> Option<Position> {
        self.lock().get(&position_key(entity_id)).and_then(decode_position)
    }

    pub fn store_position(&self, entity_id: &str, position: Position) {
        let mut store = self.lock();
        persist(&mut **store, &position_key(entity_id), position);
    }

    pub fn remove_position(&self, entity_id: &str) {
        if let Err(e) = self.lock().remove(&position_key(entity_id)) {
            warn!(entity_id, error = %e, code = e.error_code(), "layout remove failed");
        }
    }
}

fn persist(store: &mut dyn LayoutStore, key: &str, position: Position) {
    let value = serde_json::json!({ "x": position.x, "y": position.y });
    if let Err(e) = store.set(key, value) {
        warn!(key, error = %e, code = e.error_code(), "layout write failed");
    }
}

fn decode_position(value: Value) -> Option<Position> {
    let position: Position = serde_json::from_value(value).ok()?;
    (position.x.is_finite() && position.y.is_finite()).then_some(position)
}
