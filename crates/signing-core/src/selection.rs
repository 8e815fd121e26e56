//! Multi-selection of documents awaiting signature
//!
//! A selection belongs to one scope, a (document type, year) pair. It is saved
//! per scope so leaving a list and coming back restores it, and it is always
//! intersected with whatever the list currently shows.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use signing_types::{DocumentId, DocumentType};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum SelectionStoreError {
    #[error("Selection store I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Selection store is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ScopeKey {
    pub category: DocumentType,
    pub year: i32,
}

impl ScopeKey {
    pub fn new(category: DocumentType, year: i32) -> Self {
        Self { category, year }
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category, self.year)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionSet {
    pub scope: ScopeKey,
    pub ids: BTreeSet<DocumentId>,
}

impl SelectionSet {
    pub fn empty(scope: ScopeKey) -> Self {
        Self {
            scope,
            ids: BTreeSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: DocumentId) -> bool {
        self.ids.contains(&id)
    }

    /// Drop ids that are not visible. Returns how many were removed.
    pub fn prune(&mut self, visible: &BTreeSet<DocumentId>) -> usize {
        let before = self.ids.len();
        self.ids.retain(|id| visible.contains(id));
        before - self.ids.len()
    }
}

/// Durable per-scope storage for selections
pub trait SelectionStore: Send + Sync {
    fn load(&self, scope: ScopeKey) -> Result<BTreeSet<DocumentId>, SelectionStoreError>;
    fn save(&self, selection: &SelectionSet) -> Result<(), SelectionStoreError>;
}

impl<T: SelectionStore + ?Sized> SelectionStore for Arc<T> {
    fn load(&self, scope: ScopeKey) -> Result<BTreeSet<DocumentId>, SelectionStoreError> {
        (**self).load(scope)
    }

    fn save(&self, selection: &SelectionSet) -> Result<(), SelectionStoreError> {
        (**self).save(selection)
    }
}

#[derive(Debug, Default)]
pub struct MemorySelectionStore {
    entries: Mutex<BTreeMap<ScopeKey, BTreeSet<DocumentId>>>,
}

impl MemorySelectionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SelectionStore for MemorySelectionStore {
    fn load(&self, scope: ScopeKey) -> Result<BTreeSet<DocumentId>, SelectionStoreError> {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        Ok(entries.get(&scope).cloned().unwrap_or_default())
    }

    fn save(&self, selection: &SelectionSet) -> Result<(), SelectionStoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.insert(selection.scope, selection.ids.clone());
        Ok(())
    }
}

/// JSON file holding every scope, keyed by `category:year`
#[derive(Debug)]
pub struct FileSelectionStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileSelectionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> SelectionStoreError {
        SelectionStoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn read_all(&self) -> Result<BTreeMap<String, BTreeSet<DocumentId>>, SelectionStoreError> {
        match fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn write_all(
        &self,
        entries: &BTreeMap<String, BTreeSet<DocumentId>>,
    ) -> Result<(), SelectionStoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
            }
        }
        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| self.io_error(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))
    }
}

impl SelectionStore for FileSelectionStore {
    fn load(&self, scope: ScopeKey) -> Result<BTreeSet<DocumentId>, SelectionStoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        Ok(self
            .read_all()?
            .remove(&scope.to_string())
            .unwrap_or_default())
    }

    fn save(&self, selection: &SelectionSet) -> Result<(), SelectionStoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut entries = self.read_all()?;
        let key = selection.scope.to_string();
        if selection.ids.is_empty() {
            entries.remove(&key);
        } else {
            entries.insert(key, selection.ids.clone());
        }
        self.write_all(&entries)
    }
}

/// Selection state for the list currently on screen
pub struct SelectionManager<S: SelectionStore> {
    store: S,
    selection: SelectionSet,
    visible: BTreeSet<DocumentId>,
}

impl<S: SelectionStore> SelectionManager<S> {
    /// Restore the saved selection for `scope`, pruned to `visible`
    pub fn open(
        store: S,
        scope: ScopeKey,
        visible: impl IntoIterator<Item = DocumentId>,
    ) -> Result<Self, SelectionStoreError> {
        let mut manager = Self {
            store,
            selection: SelectionSet::empty(scope),
            visible: BTreeSet::new(),
        };
        manager.load_scope(scope, visible.into_iter().collect())?;
        Ok(manager)
    }

    fn load_scope(
        &mut self,
        scope: ScopeKey,
        visible: BTreeSet<DocumentId>,
    ) -> Result<(), SelectionStoreError> {
        let ids = self.store.load(scope)?;
        self.selection = SelectionSet { scope, ids };
        self.visible = visible;
        let pruned = self.selection.prune(&self.visible);
        if pruned > 0 {
            debug!("Pruned {} stale id(s) from selection {}", pruned, scope);
            self.store.save(&self.selection)?;
        }
        Ok(())
    }

    pub fn scope(&self) -> ScopeKey {
        self.selection.scope
    }

    pub fn selection(&self) -> &SelectionSet {
        &self.selection
    }

    pub fn visible(&self) -> &BTreeSet<DocumentId> {
        &self.visible
    }

    pub fn selected_ids(&self) -> Vec<DocumentId> {
        self.selection.ids.iter().copied().collect()
    }

    /// Save the current scope and restore another one
    pub fn switch_scope(
        &mut self,
        scope: ScopeKey,
        visible: impl IntoIterator<Item = DocumentId>,
    ) -> Result<(), SelectionStoreError> {
        self.store.save(&self.selection)?;
        self.load_scope(scope, visible.into_iter().collect())
    }

    /// Flip one id. Returns whether it is selected afterwards; ids not on
    /// screen are ignored.
    pub fn toggle(&mut self, id: DocumentId) -> Result<bool, SelectionStoreError> {
        if !self.visible.contains(&id) {
            warn!("Ignoring toggle of document {} not in the visible list", id);
            return Ok(false);
        }
        let selected = if self.selection.ids.remove(&id) {
            false
        } else {
            self.selection.ids.insert(id);
            true
        };
        self.store.save(&self.selection)?;
        Ok(selected)
    }

    /// Select everything visible, or clear if that is already the case
    pub fn toggle_all(&mut self) -> Result<(), SelectionStoreError> {
        if !self.visible.is_empty() && self.selection.ids == self.visible {
            self.selection.ids.clear();
        } else {
            self.selection.ids = self.visible.clone();
        }
        self.store.save(&self.selection)
    }

    pub fn clear(&mut self) -> Result<(), SelectionStoreError> {
        self.selection.ids.clear();
        self.store.save(&self.selection)
    }

    /// The visible list changed; keep only ids still shown
    pub fn refresh(
        &mut self,
        visible: impl IntoIterator<Item = DocumentId>,
    ) -> Result<usize, SelectionStoreError> {
        self.visible = visible.into_iter().collect();
        let pruned = self.selection.prune(&self.visible);
        self.store.save(&self.selection)?;
        Ok(pruned)
    }
}
