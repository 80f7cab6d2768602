//! Reader configuration
//!
//! `ReaderConfig` is plain serde data. It can be built in code, or loaded
//! from a JSON file; the default location is `reader.json` in the user's
//! configuration directory.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use log::{debug, info};
use parsely_core::{DEFAULT_MAX_DEPTH, DEFAULT_RESYNC_WINDOW, Endian, RecordFactory};
use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

use crate::error::ReaderError;

/// File name of the configuration inside the config directory
pub const CONFIG_FILE: &str = "reader.json";

/// What to do with a datagram type the catalog does not know
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, IntoStaticStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UnknownTypePolicy {
    /// Report a skip and keep going
    #[default]
    Skip,
    /// Return [`ReaderError::UnknownType`]
    Fatal,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Bytes scanned for the next valid frame after corruption
    pub resync_window: u64,
    pub unknown_types: UnknownTypePolicy,
    /// Replaces every descriptor's default byte order
    pub byte_order: Option<Endian>,
    /// Bound on nested record depth
    pub max_depth: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            resync_window: DEFAULT_RESYNC_WINDOW,
            unknown_types: UnknownTypePolicy::Skip,
            byte_order: None,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl ReaderConfig {
    /// Load from a JSON file. Missing keys take their default.
    pub fn load(path: &Path) -> Result<Self, ReaderError> {
        let file = File::open(path)
            .map_err(|e| ReaderError::Config(format!("cannot open {}: {}", path.display(), e)))?;
        let config: ReaderConfig = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| ReaderError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        debug!("Loaded reader configuration from {}", path.display());
        Ok(config)
    }

    /// Load from the default location, or fall back to the defaults when no
    /// file exists there
    pub fn load_default() -> Result<Self, ReaderError> {
        match default_config_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ReaderError> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .map_err(|e| ReaderError::Config(format!("cannot create {}: {}", dir.display(), e)))?;
        }
        let file = File::create(path)
            .map_err(|e| ReaderError::Config(format!("cannot create {}: {}", path.display(), e)))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .map_err(|e| ReaderError::Config(format!("{}: {}", path.display(), e)))?;
        info!("Saved reader configuration to {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ReaderError> {
        if self.resync_window == 0 {
            return Err(ReaderError::Config("resync_window must be at least 1 byte".into()));
        }
        if self.max_depth == 0 {
            return Err(ReaderError::Config("max_depth must be at least 1".into()));
        }
        Ok(())
    }

    /// Record factory honouring the byte order and depth settings
    pub fn factory(&self) -> RecordFactory {
        RecordFactory::new()
            .with_byte_order(self.byte_order)
            .with_max_depth(self.max_depth)
    }
}

pub fn get_project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "parsely", "parsely")
}

pub fn default_config_path() -> Option<PathBuf> {
    get_project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}
