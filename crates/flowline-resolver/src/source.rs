use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use flowline_config::AutomationDef;
use tokio::fs;

use crate::error::ResolveError;

/// Where automation definitions come from.
///
/// The authoring side owns these; the engine only reads them.
#[async_trait]
pub trait DefinitionSource: Send + Sync {
  /// Fetch a definition by automation id. `Ok(None)` when it doesn't exist.
  async fn get(&self, automation_id: &str) -> Result<Option<AutomationDef>, ResolveError>;
}

/// Filesystem-based definition source.
///
/// Definitions are stored as one JSON file per automation:
/// ```text
/// {root}/
/// ├── lead-nurture.json
/// └── welcome-email.json
/// ```
pub struct FsDefinitionSource {
  root: PathBuf,
}

impl FsDefinitionSource {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn definition_path(&self, automation_id: &str) -> PathBuf {
    self.root.join(format!("{}.json", automation_id))
  }

  /// Read and parse a single definition file.
  pub async fn read_file(path: &Path) -> Result<AutomationDef, ResolveError> {
    let content = fs::read_to_string(path)
      .await
      .map_err(|source| ResolveError::Io {
        path: path.to_path_buf(),
        source,
      })?;
    serde_json::from_str(&content).map_err(|source| ResolveError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }
}

#[async_trait]
impl DefinitionSource for FsDefinitionSource {
  async fn get(&self, automation_id: &str) -> Result<Option<AutomationDef>, ResolveError> {
    // Ids become file names; refuse anything that could escape the root
    if automation_id.is_empty()
      || automation_id.contains(['/', '\\'])
      || automation_id.starts_with('.')
    {
      return Ok(None);
    }

    let path = self.definition_path(automation_id);
    match fs::metadata(&path).await {
      Ok(_) => Self::read_file(&path).await.map(Some),
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
      Err(source) => Err(ResolveError::Io { path, source }),
    }
  }
}

/// In-memory definition source, keyed by automation id.
#[derive(Default)]
pub struct MemoryDefinitionSource {
  definitions: RwLock<HashMap<String, AutomationDef>>,
}

impl MemoryDefinitionSource {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&self, def: AutomationDef) {
    if let Ok(mut definitions) = self.definitions.write() {
      definitions.insert(def.id.clone(), def);
    }
  }
}

#[async_trait]
impl DefinitionSource for MemoryDefinitionSource {
  async fn get(&self, automation_id: &str) -> Result<Option<AutomationDef>, ResolveError> {
    Ok(
      self
        .definitions
        .read()
        .ok()
        .and_then(|d| d.get(automation_id).cloned()),
    )
  }
}
