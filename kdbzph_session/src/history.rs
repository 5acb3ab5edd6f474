use kdbzph_protocol::{HISTORY_CAP, HISTORY_KEY};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("history encode failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("history storage lock poisoned")]
    Poisoned,
}

/// Durable key/value home for the history sequence.
pub trait HistoryStorage: Send {
    fn load(&self) -> Result<Vec<String>, HistoryError>;
    fn save(&mut self, entries: &[String]) -> Result<(), HistoryError>;
}

/// JSON object file; history lives under [`HISTORY_KEY`], other keys are preserved.
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_object(&self) -> Result<Map<String, Value>, HistoryError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str::<Value>(&text)? {
            Value::Object(map) => Ok(map),
            _ => Ok(Map::new()),
        }
    }
}

impl HistoryStorage for JsonFileStorage {
    fn load(&self) -> Result<Vec<String>, HistoryError> {
        let mut map = self.read_object()?;
        let Some(Value::Array(items)) = map.remove(HISTORY_KEY) else {
            return Ok(Vec::new());
        };
        Ok(items
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect())
    }

    fn save(&mut self, entries: &[String]) -> Result<(), HistoryError> {
        // A corrupt file is replaced rather than blocking every save.
        let mut map = match self.read_object() {
            Ok(map) => map,
            Err(HistoryError::Json(e)) => {
                tracing::warn!(
                    error = %e,
                    path = %self.path.display(),
                    "replacing corrupt history file"
                );
                Map::new()
            }
            Err(e) => return Err(e),
        };
        map.insert(HISTORY_KEY.to_string(), serde_json::to_value(entries)?);
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        std::fs::write(&self.path, serde_json::to_string(&Value::Object(map))?)?;
        Ok(())
    }
}

/// Process-local storage. Clones share the same entries.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<Mutex<Vec<String>>>,
}

impl MemoryStorage {
    pub fn with_entries(entries: Vec<String>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(entries)),
        }
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.entries.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

impl HistoryStorage for MemoryStorage {
    fn load(&self) -> Result<Vec<String>, HistoryError> {
        self.entries
            .lock()
            .map(|g| g.clone())
            .map_err(|_| HistoryError::Poisoned)
    }

    fn save(&mut self, entries: &[String]) -> Result<(), HistoryError> {
        let mut g = self.entries.lock().map_err(|_| HistoryError::Poisoned)?;
        *g = entries.to_vec();
        Ok(())
    }
}

/// Submitted expressions plus a recall cursor.
///
/// `cursor == None` is the beyond-end position (empty draft).
pub struct HistoryStore {
    entries: Vec<String>,
    cursor: Option<usize>,
    storage: Box<dyn HistoryStorage>,
}

impl HistoryStore {
    /// Loads persisted entries. Unreadable storage starts an empty history.
    pub fn open(storage: Box<dyn HistoryStorage>) -> Self {
        let mut entries = match storage.load() {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "history unreadable, starting empty");
                Vec::new()
            }
        };
        truncate_front(&mut entries);
        Self {
            entries,
            cursor: None,
            storage,
        }
    }

    pub fn in_memory() -> Self {
        Self::open(Box::new(MemoryStorage::default()))
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    /// Appends unless equal to the last entry, persists, and resets the cursor.
    ///
    /// The in-memory entry is kept even when persisting fails.
    pub fn record(&mut self, expr: &str) -> Result<(), HistoryError> {
        self.cursor = None;
        if self.entries.last().map(String::as_str) == Some(expr) {
            return Ok(());
        }
        self.entries.push(expr.to_string());
        truncate_front(&mut self.entries);
        self.storage.save(&self.entries)
    }

    pub fn prior(&mut self) -> String {
        if self.entries.is_empty() {
            return String::new();
        }
        let idx = match self.cursor {
            Some(i) => i.saturating_sub(1),
            None => self.entries.len() - 1,
        };
        self.cursor = Some(idx);
        self.entries[idx].clone()
    }

    pub fn next(&mut self) -> String {
        let Some(i) = self.cursor else {
            return String::new();
        };
        if i + 1 >= self.entries.len() {
            self.cursor = None;
            return String::new();
        }
        self.cursor = Some(i + 1);
        self.entries[i + 1].clone()
    }
}

fn truncate_front(entries: &mut Vec<String>) {
    if entries.len() > HISTORY_CAP {
        let excess = entries.len() - HISTORY_CAP;
        entries.drain(..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(entries: &[&str]) -> (HistoryStore, MemoryStorage) {
        let storage =
            MemoryStorage::with_entries(entries.iter().map(|s| s.to_string()).collect());
        (HistoryStore::open(Box::new(storage.clone())), storage)
    }

    #[test]
    fn consecutive_duplicates_are_suppressed() {
        let (mut h, storage) = store_with(&[]);
        h.record("a").unwrap();
        assert_eq!(h.cursor(), None);
        h.record("a").unwrap();
        assert_eq!(h.cursor(), None);
        h.record("b").unwrap();
        assert_eq!(h.entries(), ["a", "b"]);
        assert_eq!(h.cursor(), None);
        assert_eq!(storage.snapshot(), vec!["a", "b"]);
    }

    #[test]
    fn non_consecutive_duplicates_are_kept() {
        let (mut h, _) = store_with(&[]);
        for e in ["a", "b", "a"] {
            h.record(e).unwrap();
        }
        assert_eq!(h.entries(), ["a", "b", "a"]);
    }

    #[test]
    fn navigation_clamps_at_start_and_empties_past_end() {
        let (mut h, _) = store_with(&["a", "b", "c"]);
        assert_eq!(h.prior(), "c");
        assert_eq!(h.prior(), "b");
        assert_eq!(h.prior(), "a");
        assert_eq!(h.prior(), "a");
        assert_eq!(h.cursor(), Some(0));
        assert_eq!(h.next(), "b");
        assert_eq!(h.next(), "c");
        assert_eq!(h.next(), "");
        assert_eq!(h.cursor(), None);
        assert_eq!(h.next(), "");
    }

    #[test]
    fn navigation_on_empty_history_is_a_noop() {
        let (mut h, _) = store_with(&[]);
        assert_eq!(h.prior(), "");
        assert_eq!(h.next(), "");
        assert_eq!(h.cursor(), None);
    }

    #[test]
    fn record_resets_cursor_after_navigation() {
        let (mut h, _) = store_with(&["a", "b"]);
        h.prior();
        h.prior();
        h.record("b").unwrap();
        assert_eq!(h.cursor(), None);
        assert_eq!(h.prior(), "b");
    }

    #[test]
    fn keeps_only_most_recent_entries() {
        let (mut h, storage) = store_with(&[]);
        for i in 0..(HISTORY_CAP + 5) {
            h.record(&format!("e{i}")).unwrap();
        }
        assert_eq!(h.entries().len(), HISTORY_CAP);
        assert_eq!(h.entries()[0], "e5");
        assert_eq!(storage.snapshot().len(), HISTORY_CAP);
    }

    #[test]
    fn oversized_persisted_history_is_truncated_on_open() {
        let many: Vec<String> = (0..150).map(|i| i.to_string()).collect();
        let h = HistoryStore::open(Box::new(MemoryStorage::with_entries(many)));
        assert_eq!(h.entries().len(), HISTORY_CAP);
        assert_eq!(h.entries().last().map(String::as_str), Some("149"));
    }

    #[test]
    fn json_file_round_trips_and_keeps_other_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, r#"{"theme": "dark"}"#).unwrap();

        let mut h = HistoryStore::open(Box::new(JsonFileStorage::new(&path)));
        h.record("select from t").unwrap();
        h.record("count t").unwrap();

        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["theme"], "dark");
        assert_eq!(raw[HISTORY_KEY][1], "count t");

        let reopened = HistoryStore::open(Box::new(JsonFileStorage::new(&path)));
        assert_eq!(reopened.entries(), ["select from t", "count t"]);
    }

    #[test]
    fn corrupt_file_loads_as_empty_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "{not json").unwrap();

        let mut h = HistoryStore::open(Box::new(JsonFileStorage::new(&path)));
        assert!(h.entries().is_empty());
        h.record("x").unwrap();
        assert_eq!(JsonFileStorage::new(&path).load().unwrap(), vec!["x"]);
    }

    #[test]
    fn unreadable_file_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let original = [0xff_u8, 0xfe, b'{'];
        std::fs::write(&path, original).unwrap();

        let mut storage = JsonFileStorage::new(&path);
        assert!(matches!(
            storage.save(&["x".to_string()]),
            Err(HistoryError::Io(_))
        ));
        assert_eq!(std::fs::read(&path).unwrap(), original);
    }
}
