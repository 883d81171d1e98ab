// config.rs - vmap settings backed by console variables

use std::path::PathBuf;

use vmap_common::cvar::{CvarContext, CvarFlags};

pub const CVAR_ENABLE_LOS: &str = "vmap_enable_los";
pub const CVAR_ENABLE_HEIGHT: &str = "vmap_enable_height";
pub const CVAR_IGNORE_SPELLS: &str = "vmap_ignore_spells";
pub const CVAR_DATA_DIR: &str = "vmap_data_dir";

#[derive(Debug, Clone, PartialEq)]
pub struct VMapConfig {
    pub enable_los: bool,
    pub enable_height: bool,
    /// Comma separated spell ids that never check LoS.
    pub ignore_spells: String,
    pub data_dir: PathBuf,
}

impl Default for VMapConfig {
    fn default() -> Self {
        Self {
            enable_los: true,
            enable_height: true,
            ignore_spells: String::new(),
            data_dir: PathBuf::from("vmaps"),
        }
    }
}

impl VMapConfig {
    /// Create the vmap cvars with their defaults. Values already set, for
    /// example by an earlier `exec_config`, are kept.
    pub fn register(cvars: &mut CvarContext) {
        cvars.get(CVAR_ENABLE_LOS, "1", CvarFlags::ARCHIVE);
        cvars.get(CVAR_ENABLE_HEIGHT, "1", CvarFlags::ARCHIVE);
        cvars.get(CVAR_IGNORE_SPELLS, "", CvarFlags::ARCHIVE);
        cvars.get(CVAR_DATA_DIR, "vmaps", CvarFlags::NOSET);
    }

    pub fn from_cvars(cvars: &mut CvarContext) -> Self {
        Self::register(cvars);
        Self {
            enable_los: cvars.variable_bool(CVAR_ENABLE_LOS),
            enable_height: cvars.variable_bool(CVAR_ENABLE_HEIGHT),
            ignore_spells: cvars.variable_string(CVAR_IGNORE_SPELLS).to_string(),
            data_dir: PathBuf::from(cvars.variable_string(CVAR_DATA_DIR)),
        }
    }
}
