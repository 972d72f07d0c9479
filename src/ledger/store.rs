//! Durable per-scope snapshots.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::ConsoleResult;
use crate::ledger::scope::BudgetScope;

const LEDGER_DIR_NAME: &str = "ledger";
const SCOPES_DIR_NAME: &str = "scopes";

/// One JSON file per scope, so writes for different scopes never contend.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    scopes_dir: PathBuf,
}

impl LedgerStore {
    /// Create a store rooted at `<base_dir>/ledger/scopes`.
    pub fn new(base_dir: impl AsRef<Path>) -> ConsoleResult<Self> {
        let scopes_dir = base_dir
            .as_ref()
            .join(LEDGER_DIR_NAME)
            .join(SCOPES_DIR_NAME);
        fs::create_dir_all(&scopes_dir)?;
        Ok(Self { scopes_dir })
    }

    /// Persist a scope snapshot.
    pub fn save(&self, scope: &BudgetScope) -> ConsoleResult<()> {
        write_json_atomic(&self.scope_path(&scope.id), scope)
    }

    /// Persist a scope snapshot on the blocking pool.
    pub async fn persist(&self, scope: &BudgetScope) -> ConsoleResult<()> {
        let store = self.clone();
        let scope = scope.clone();
        tokio::task::spawn_blocking(move || store.save(&scope)).await?
    }

    /// Load every stored scope.
    pub fn load_all(&self) -> ConsoleResult<Vec<BudgetScope>> {
        let mut scopes = Vec::new();
        for entry in fs::read_dir(&self.scopes_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read_to_string(&path)?;
            scopes.push(serde_json::from_str(&content)?);
        }
        Ok(scopes)
    }

    fn scope_path(&self, scope_id: &str) -> PathBuf {
        self.scopes_dir.join(format!("{}.json", scope_id))
    }
}

/// Write `value` as pretty JSON via a temp file and rename.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> ConsoleResult<()> {
    let json = serde_json::to_string_pretty(value)?;
    let temp_path = path.with_extension("json.tmp");

    let mut file = fs::File::create(&temp_path)?;
    file.write_all(json.as_bytes())?;
    file.sync_all()?;
    fs::rename(&temp_path, path)?;

    Ok(())
}
