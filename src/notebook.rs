use anyhow::{anyhow, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Reference to an open notebook
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotebookHandle {
    id: String,
    path: String,
}

impl NotebookHandle {
    pub fn new(id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Path of the notebook file, relative to the content root
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Reference to a cell inside an open notebook
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellHandle {
    id: String,
    notebook_id: String,
}

impl CellHandle {
    pub fn new(id: impl Into<String>, notebook_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            notebook_id: notebook_id.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn notebook_id(&self) -> &str {
        &self.notebook_id
    }
}

/// Lookup of notebooks and cells owned by the host application.
///
/// Dashboards only hold notebook and cell ids; everything else goes
/// through this trait.
pub trait NotebookResolver {
    fn find_notebook(&self, id: &str) -> Option<NotebookHandle>;

    fn find_cell(&self, id: &str) -> Option<CellHandle>;

    fn notebook_metadata(&self, notebook_id: &str, key: &str) -> Option<Value>;

    /// Write a value into a notebook's metadata under `key`
    fn set_notebook_metadata(&mut self, notebook_id: &str, key: &str, value: Value) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
struct TrackedNotebook {
    path: String,
    cells: Vec<String>,
    metadata: Map<String, Value>,
}

/// In-memory notebook registry
#[derive(Debug, Clone, Default)]
pub struct NotebookTracker {
    notebooks: HashMap<String, TrackedNotebook>,
    cells: HashMap<String, String>,
}

impl NotebookTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an open notebook
    pub fn add_notebook(&mut self, id: impl Into<String>, path: impl Into<String>) {
        self.notebooks.insert(
            id.into(),
            TrackedNotebook {
                path: path.into(),
                ..Default::default()
            },
        );
    }

    /// Register a cell of an already registered notebook
    pub fn add_cell(&mut self, notebook_id: &str, cell_id: impl Into<String>) -> Result<()> {
        let cell_id = cell_id.into();
        let notebook = self
            .notebooks
            .get_mut(notebook_id)
            .ok_or_else(|| anyhow!("Notebook not found: {}", notebook_id))?;
        notebook.cells.push(cell_id.clone());
        self.cells.insert(cell_id, notebook_id.to_string());
        Ok(())
    }

    /// Close a notebook, forgetting its cells
    pub fn remove_notebook(&mut self, id: &str) {
        if let Some(notebook) = self.notebooks.remove(id) {
            for cell in notebook.cells {
                self.cells.remove(&cell);
            }
        }
    }
}

impl NotebookResolver for NotebookTracker {
    fn find_notebook(&self, id: &str) -> Option<NotebookHandle> {
        self.notebooks
            .get(id)
            .map(|nb| NotebookHandle::new(id, nb.path.clone()))
    }

    fn find_cell(&self, id: &str) -> Option<CellHandle> {
        self.cells
            .get(id)
            .map(|notebook_id| CellHandle::new(id, notebook_id.clone()))
    }

    fn notebook_metadata(&self, notebook_id: &str, key: &str) -> Option<Value> {
        self.notebooks.get(notebook_id)?.metadata.get(key).cloned()
    }

    fn set_notebook_metadata(&mut self, notebook_id: &str, key: &str, value: Value) -> Result<()> {
        let notebook = self
            .notebooks
            .get_mut(notebook_id)
            .ok_or_else(|| anyhow!("Notebook not found: {}", notebook_id))?;
        notebook.metadata.insert(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_handles_are_reversible() {
        let mut tracker = NotebookTracker::new();
        tracker.add_notebook("nb-1", "analysis/report.ipynb");
        tracker.add_cell("nb-1", "cell-1").unwrap();

        let notebook = tracker.find_notebook("nb-1").unwrap();
        assert_eq!(notebook.id(), "nb-1");
        assert_eq!(notebook.path(), "analysis/report.ipynb");

        let cell = tracker.find_cell("cell-1").unwrap();
        assert_eq!(cell.id(), "cell-1");
        assert_eq!(cell.notebook_id(), "nb-1");
    }

    #[test]
    fn test_missing_lookups() {
        let mut tracker = NotebookTracker::new();
        assert!(tracker.find_notebook("nope").is_none());
        assert!(tracker.find_cell("nope").is_none());
        assert!(tracker.add_cell("nope", "cell").is_err());
        assert!(tracker.set_notebook_metadata("nope", "k", json!(1)).is_err());
    }

    #[test]
    fn test_remove_notebook_drops_cells() {
        let mut tracker = NotebookTracker::new();
        tracker.add_notebook("nb-1", "a.ipynb");
        tracker.add_cell("nb-1", "cell-1").unwrap();
        tracker.remove_notebook("nb-1");

        assert!(tracker.find_cell("cell-1").is_none());
    }

    #[test]
    fn test_metadata_roundtrip() {
        let mut tracker = NotebookTracker::new();
        tracker.add_notebook("nb-1", "a.ipynb");
        tracker
            .set_notebook_metadata("nb-1", "dashboard", json!({ "name": "d" }))
            .unwrap();
        assert_eq!(
            tracker.notebook_metadata("nb-1", "dashboard"),
            Some(json!({ "name": "d" }))
        );
    }
}
