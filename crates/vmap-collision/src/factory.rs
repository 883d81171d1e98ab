// factory.rs - process-wide vmap context
//
// Owns the shared manager handle and the spells exempt from line of sight
// checks. Create one per process and pass it to whoever needs queries.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::config::VMapConfig;
use crate::manager::VMapManager;

pub struct VMapFactory {
    manager: Arc<RwLock<VMapManager>>,
    ignored_spells: HashSet<u32>,
    data_dir: PathBuf,
}

impl VMapFactory {
    pub fn new(config: &VMapConfig) -> Self {
        let mut factory = Self {
            manager: Arc::new(RwLock::new(VMapManager::from_config(config))),
            ignored_spells: HashSet::new(),
            data_dir: config.data_dir.clone(),
        };
        factory.set_spells_ignored_for_los(&config.ignore_spells);
        factory
    }

    /// Shared handle; queries take the read lock, loading the write lock.
    pub fn manager(&self) -> Arc<RwLock<VMapManager>> {
        Arc::clone(&self.manager)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Replace the ignored spell set from a list like `"1, 2,3"`. Quotes
    /// and blanks around the list and around each id are dropped.
    pub fn set_spells_ignored_for_los(&mut self, list: &str) {
        self.ignored_spells.clear();
        let list = chomp_and_trim(list);
        if list.is_empty() {
            return;
        }
        for piece in list.split(',') {
            let piece = chomp_and_trim(piece);
            match piece.parse::<u32>() {
                Ok(id) => {
                    self.ignored_spells.insert(id);
                }
                Err(_) => warn!("ignoring invalid spell id '{}' in LoS ignore list", piece),
            }
        }
        debug!("{} spells ignored for LoS", self.ignored_spells.len());
    }

    /// True if `spell_id` must be checked for line of sight.
    pub fn check_spell_for_los(&self, spell_id: u32) -> bool {
        !self.ignored_spells.contains(&spell_id)
    }

    /// Drop every loaded map and the ignore list.
    pub fn clear(&mut self) {
        self.ignored_spells.clear();
        let mut manager = self.manager.write();
        let config = VMapConfig {
            enable_los: manager.is_enabled_los(),
            enable_height: manager.is_enabled_height(),
            ..VMapConfig::default()
        };
        *manager = VMapManager::from_config(&config);
    }
}

fn chomp_and_trim(s: &str) -> &str {
    s.trim_end_matches(&['\r', '\n', ' ', '"', '\''][..])
        .trim_start_matches(&[' ', '"', '\''][..])
}
