//! Filesystem provisioning: one hidden working directory per instance.

use ensemble_core::provision::markers;
use ensemble_core::{EngineId, Instance, ProvisionError, Provisioner};
use std::path::{Path, PathBuf};
use tracing::debug;

/// File written into every working directory with the instance's markers.
pub const MARKERS_FILE: &str = "markers.json";

/// Creates `<root>/.<instance>` for every instance and writes its markers.
#[derive(Debug, Clone)]
pub struct WorkdirProvisioner {
    root: PathBuf,
}

impl WorkdirProvisioner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Working directory for `id`.
    pub fn workdir(&self, id: &EngineId) -> PathBuf {
        self.root.join(format!(".{}", id))
    }
}

impl Provisioner for WorkdirProvisioner {
    fn provision(&self, names: &[EngineId]) -> Result<Vec<Instance>, ProvisionError> {
        if names.is_empty() {
            return Err(ProvisionError::Invalid("no instances to provision".to_string()));
        }

        let mut instances = Vec::with_capacity(names.len());
        for id in names {
            let dir = self.workdir(id);
            let io = |source| ProvisionError::Io {
                instance: id.to_string(),
                source,
            };

            std::fs::create_dir_all(&dir).map_err(io)?;
            let markers = markers(id, names, Some(&dir));
            let json = serde_json::to_string_pretty(&markers)?;
            std::fs::write(dir.join(MARKERS_FILE), json).map_err(io)?;

            debug!(instance = %id, workdir = %dir.display(), "Provisioned");
            instances.push(Instance {
                id: id.clone(),
                workdir: Some(dir),
                markers,
            });
        }
        Ok(instances)
    }
}
