//! Provisioning seam: one ready-to-run [`Instance`] per instance name.

use crate::error::ProvisionError;
use crate::instance::{EngineId, Instance};
use std::collections::BTreeMap;
use std::path::Path;

/// Prepares every instance before any engine is started.
///
/// Failure here is fatal for the run.
pub trait Provisioner {
    fn provision(&self, names: &[EngineId]) -> Result<Vec<Instance>, ProvisionError>;
}

/// Template markers for one instance.
///
/// `instance` is the instance's own name, `instances` every provisioned name
/// (comma separated), and `path` its working directory when it has one.
pub fn markers(id: &EngineId, all: &[EngineId], path: Option<&Path>) -> BTreeMap<String, String> {
    let mut markers = BTreeMap::new();
    markers.insert("instance".to_string(), id.to_string());
    markers.insert(
        "instances".to_string(),
        all.iter().map(EngineId::as_str).collect::<Vec<_>>().join(","),
    );
    if let Some(path) = path {
        markers.insert("path".to_string(), path.display().to_string());
    }
    markers
}

/// Provisions instances with markers only; no files are touched.
#[derive(Debug, Clone, Copy, Default)]
pub struct InMemoryProvisioner;

impl Provisioner for InMemoryProvisioner {
    fn provision(&self, names: &[EngineId]) -> Result<Vec<Instance>, ProvisionError> {
        if names.is_empty() {
            return Err(ProvisionError::Invalid("no instances to provision".to_string()));
        }

        Ok(names
            .iter()
            .map(|id| Instance {
                id: id.clone(),
                workdir: None,
                markers: markers(id, names, None),
            })
            .collect())
    }
}
