// model_cache.rs - reference counted storage of loaded world models
//
// One WorldModel per model file name, shared by every instance that places
// it. Instances only hold weak handles; the last release drops the model.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error};
use vmap_common::{VMapError, VMapResult};

use crate::world_model::WorldModel;

struct ManagedModel {
    model: Arc<WorldModel>,
    ref_count: u32,
}

#[derive(Default)]
pub struct ModelCache {
    models: HashMap<String, ManagedModel>,
}

/// `<base>/<name>.vmo`
pub fn model_file_path(base_path: &Path, name: &str) -> std::path::PathBuf {
    base_path.join(format!("{}.vmo", name))
}

impl ModelCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle to the model `name`, loading it on first use. Every
    /// successful call must be paired with one `release`.
    pub fn acquire(&mut self, base_path: &Path, name: &str) -> VMapResult<Arc<WorldModel>> {
        if let Some(entry) = self.models.get_mut(name) {
            entry.ref_count += 1;
            return Ok(Arc::clone(&entry.model));
        }

        let path = model_file_path(base_path, name);
        let model = match WorldModel::read_file(&path) {
            Ok(model) => Arc::new(model),
            Err(e) => {
                error!("could not load '{}': {}", path.display(), e);
                return Err(VMapError::ModelNotLoaded(name.to_string()));
            }
        };
        debug!("loading model file '{}'", path.display());

        self.models.insert(
            name.to_string(),
            ManagedModel {
                model: Arc::clone(&model),
                ref_count: 1,
            },
        );
        Ok(model)
    }

    pub fn release(&mut self, name: &str) {
        let Some(entry) = self.models.get_mut(name) else {
            error!("trying to unload non-loaded file '{}'", name);
            return;
        };
        entry.ref_count -= 1;
        if entry.ref_count == 0 {
            debug!("unloading model file '{}'", name);
            self.models.remove(name);
        }
    }

    pub fn ref_count(&self, name: &str) -> u32 {
        self.models.get(name).map_or(0, |entry| entry.ref_count)
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
