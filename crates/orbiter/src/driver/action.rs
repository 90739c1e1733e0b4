//! Actions: one compiled test artifact each

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::warn;

/// A test artifact to compile, push and run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    /// Artifact file stem; names every task of the action
    pub name: String,
    /// Host path of the artifact
    pub artifact: PathBuf,
}

impl Action {
    /// Derive an action from an artifact path
    pub fn from_artifact(path: &Path) -> anyhow::Result<Self> {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .with_context(|| format!("cannot derive an action name from {}", path.display()))?;
        Ok(Self {
            name: name.to_string(),
            artifact: path.to_path_buf(),
        })
    }

    /// Artifact file name, kept across compile and push
    pub fn file_name(&self) -> String {
        self.artifact
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.name.clone())
    }

    /// Name of one of this action's tasks (`<name>:<step>`)
    pub fn task(&self, step: &str) -> String {
        format!("{}:{}", self.name, step)
    }
}

/// Actions for the given artifacts, de-duplicated by name (first one wins)
pub fn collect_actions(artifacts: &[PathBuf]) -> anyhow::Result<Vec<Action>> {
    let mut seen: HashMap<String, PathBuf> = HashMap::new();
    let mut actions = Vec::new();

    for path in artifacts {
        let action = Action::from_artifact(path)?;
        if let Some(previous) = seen.get(&action.name) {
            if previous != path {
                warn!(
                    action = %action.name,
                    kept = %previous.display(),
                    ignored = %path.display(),
                    "duplicate action name"
                );
            }
            continue;
        }
        seen.insert(action.name.clone(), path.clone());
        actions.push(action);
    }
    Ok(actions)
}
