//! Persistent template stores
//!
//! The coordinator calls [`TemplateStore::sync`] after every merge. A failed
//! sync is logged and retried on the next recycle; the canonical model is
//! never discarded because of it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::debug;

use crate::model::{Template, TemplateModel};

pub const STATE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path}: invalid state file: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{path}: unsupported state format version {found} (expected {})", STATE_FORMAT_VERSION)]
    UnsupportedVersion { path: PathBuf, found: u32 },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub trait TemplateStore: Send {
    /// Model persisted by an earlier run, if any
    fn load(&mut self) -> Result<Option<TemplateModel>, StoreError>;

    fn sync(&mut self, model: &TemplateModel, generation: u64) -> Result<(), StoreError>;
}

impl<S: TemplateStore + ?Sized> TemplateStore for Box<S> {
    fn load(&mut self) -> Result<Option<TemplateModel>, StoreError> {
        (**self).load()
    }

    fn sync(&mut self, model: &TemplateModel, generation: u64) -> Result<(), StoreError> {
        (**self).sync(model, generation)
    }
}

/// Keeps nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStore;

impl TemplateStore for NullStore {
    fn load(&mut self) -> Result<Option<TemplateModel>, StoreError> {
        Ok(None)
    }

    fn sync(&mut self, _model: &TemplateModel, _generation: u64) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    format_version: u32,
    generation: u64,
    synced_at: DateTime<Utc>,
    templates: Vec<Template>,
}

/// Versioned JSON state file, replaced atomically on every sync
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn read_state(&self) -> Result<Option<StateFile>, StoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(self.io_error(err)),
        };

        let state: StateFile =
            serde_json::from_str(&content).map_err(|source| StoreError::Json {
                path: self.path.clone(),
                source,
            })?;
        if state.format_version != STATE_FORMAT_VERSION {
            return Err(StoreError::UnsupportedVersion {
                path: self.path.clone(),
                found: state.format_version,
            });
        }
        Ok(Some(state))
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "state".to_string());
        self.path.with_file_name(format!(".{}.tmp", name))
    }
}

impl TemplateStore for JsonFileStore {
    fn load(&mut self) -> Result<Option<TemplateModel>, StoreError> {
        Ok(self
            .read_state()?
            .map(|state| TemplateModel::from_templates(state.templates)))
    }

    fn sync(&mut self, model: &TemplateModel, generation: u64) -> Result<(), StoreError> {
        let mut templates: Vec<Template> = model.iter().cloned().collect();

        // Another instance may have synced templates this process never saw
        if let Some(on_disk) = self.read_state()? {
            let foreign = on_disk
                .templates
                .into_iter()
                .filter(|template| !model.contains(&template.id));
            templates.extend(foreign);
        }

        let state = StateFile {
            format_version: STATE_FORMAT_VERSION,
            generation,
            synced_at: Utc::now(),
            templates,
        };
        let json = serde_json::to_vec_pretty(&state).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })?;

        let temp_path = self.temp_path();
        let write_temp = || -> io::Result<()> {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(&json)?;
            file.write_all(b"\n")?;
            file.sync_all()
        };
        write_temp().map_err(|err| self.io_error(err))?;
        fs::rename(&temp_path, &self.path).map_err(|err| self.io_error(err))?;

        debug!(
            path = %self.path.display(),
            generation,
            templates = state.templates.len(),
            "state file written"
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    model: Option<TemplateModel>,
    synced_generations: Vec<u64>,
    failures_left: usize,
}

/// In-process store. Clones share the same state, so a caller can keep a
/// handle and inspect what the pipeline synced.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(model: TemplateModel) -> Self {
        let store = Self::new();
        store.lock().model = Some(model);
        store
    }

    /// Make the next `count` syncs fail
    pub fn fail_next_syncs(&self, count: usize) {
        self.lock().failures_left = count;
    }

    pub fn sync_count(&self) -> usize {
        self.lock().synced_generations.len()
    }

    pub fn synced_generations(&self) -> Vec<u64> {
        self.lock().synced_generations.clone()
    }

    pub fn model(&self) -> Option<TemplateModel> {
        self.lock().model.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TemplateStore for MemoryStore {
    fn load(&mut self) -> Result<Option<TemplateModel>, StoreError> {
        Ok(self.lock().model.clone())
    }

    fn sync(&mut self, model: &TemplateModel, generation: u64) -> Result<(), StoreError> {
        let mut state = self.lock();
        if state.failures_left > 0 {
            state.failures_left -= 1;
            return Err(StoreError::Unavailable(format!(
                "injected failure at generation {}",
                generation
            )));
        }
        state.model = Some(model.clone());
        state.synced_generations.push(generation);
        Ok(())
    }
}
