use crate::models::Movie;
use anyhow::{Context, Result};
use once_cell::unsync::OnceCell;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::string::FromUtf8Error;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

pub const FAVORITES_KEY: &str = "favorites";

/// Named string records that survive restarts.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// One `<key>.json` file per record inside `dir`.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let bytes = match fs::read(self.path(key)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read record '{}'", key))
            }
        };
        String::from_utf8(bytes)
            .map(Some)
            .with_context(|| format!("Record '{}' is not UTF-8", key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let path = self.path(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("Failed to replace {}", path.display()))
    }

    fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove record '{}'", key)),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(key: &str, value: &str) -> Self {
        let store = Self::default();
        if let Ok(mut records) = store.records.lock() {
            records.insert(key.to_string(), value.to_string());
        }
        store
    }

    fn records(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.records
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.records()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.records()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.records()?.remove(key);
        Ok(())
    }
}

/// The user's favorite movies, unique by id and kept in insertion order.
///
/// The persisted record is read on first access. A read that fails leaves the
/// store unloaded so the next access retries. Mutations write the new
/// collection first and only then replace the in-memory copy, so a failed
/// write changes nothing.
pub struct FavoritesStore {
    storage: Arc<dyn KeyValueStore>,
    key: String,
    movies: OnceCell<Vec<Movie>>,
}

impl FavoritesStore {
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        Self::with_key(storage, FAVORITES_KEY)
    }

    pub fn with_key(storage: Arc<dyn KeyValueStore>, key: &str) -> Self {
        Self {
            storage,
            key: key.to_string(),
            movies: OnceCell::new(),
        }
    }

    pub fn list(&self) -> Result<&[Movie]> {
        Ok(self.loaded()?.as_slice())
    }

    /// `false` also when the record cannot be read right now.
    pub fn contains(&self, id: i32) -> bool {
        match self.loaded() {
            Ok(movies) => movies.iter().any(|m| m.id == id),
            Err(e) => {
                warn!("Favorites unavailable: {:#}", e);
                false
            }
        }
    }

    /// Returns `false` when the movie was already a favorite.
    pub fn add(&mut self, movie: Movie) -> Result<bool> {
        let current = self.loaded()?;
        if current.iter().any(|m| m.id == movie.id) {
            return Ok(false);
        }
        let (id, title) = (movie.id, movie.title.clone());
        let mut next = current.clone();
        next.push(movie);
        self.commit(next)?;
        info!("Added favorite {} '{}'", id, title);
        Ok(true)
    }

    /// Returns `false` when the id was not a favorite.
    pub fn remove(&mut self, id: i32) -> Result<bool> {
        let current = self.loaded()?;
        if !current.iter().any(|m| m.id == id) {
            return Ok(false);
        }
        let next: Vec<Movie> = current.iter().filter(|m| m.id != id).cloned().collect();
        self.commit(next)?;
        info!("Removed favorite {}", id);
        Ok(true)
    }

    fn loaded(&self) -> Result<&Vec<Movie>> {
        self.movies
            .get_or_try_init(|| load_record(self.storage.as_ref(), &self.key))
    }

    fn commit(&mut self, next: Vec<Movie>) -> Result<()> {
        let json = serde_json::to_string(&next).context("Failed to serialize favorites")?;
        self.storage
            .set(&self.key, &json)
            .context("Failed to persist favorites")?;
        self.movies = OnceCell::with_value(next);
        Ok(())
    }
}

/// Reads the stored collection. A missing record is empty; a corrupt one is
/// discarded and treated as empty. Storage errors are returned.
fn load_record(storage: &dyn KeyValueStore, key: &str) -> Result<Vec<Movie>> {
    let text = match storage.get(key) {
        Ok(Some(text)) => text,
        Ok(None) => return Ok(Vec::new()),
        Err(e) if e.chain().any(|c| c.is::<FromUtf8Error>()) => {
            discard_corrupt(storage, key, &format!("{:#}", e));
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.context("Failed to read favorites")),
    };
    match serde_json::from_str::<Vec<Movie>>(&text) {
        Ok(movies) => {
            let mut seen = HashSet::new();
            let unique: Vec<Movie> = movies.into_iter().filter(|m| seen.insert(m.id)).collect();
            debug!("Loaded {} favorites", unique.len());
            Ok(unique)
        }
        Err(e) => {
            discard_corrupt(storage, key, &e.to_string());
            Ok(Vec::new())
        }
    }
}

fn discard_corrupt(storage: &dyn KeyValueStore, key: &str, reason: &str) {
    warn!("Discarding corrupt favorites record: {}", reason);
    if let Err(e) = storage.remove(key) {
        warn!("Failed to remove corrupt favorites record: {:#}", e);
    }
}
