use crate::config::AppConfig;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Extension of the primary data file backing a database.
pub const DATA_EXT: &str = "mdf";
/// Suffix of the transaction log file paired with each data file.
pub const LOG_SUFFIX: &str = "_log.ldf";
/// File inside the instance directory holding the last-applied uniqueness token.
pub const MARKER_FILE: &str = "uniqueness.txt";

/// Maximum length of an instance or database name.
pub const MAX_NAME_LEN: usize = 64;

/// Resolve the root directory under which all instance directories live.
///
/// Precedence: explicit config override, then the `TEMPLATEDB_DIR` environment
/// variable, then `<system temp dir>/templatedb`.
pub fn resolve_root(config: &AppConfig) -> PathBuf {
    if let Some(root) = &config.storage.root {
        return root.clone();
    }
    if let Ok(dir) = std::env::var("TEMPLATEDB_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    std::env::temp_dir().join("templatedb")
}

/// Map an instance name to its on-disk directory, creating it if absent.
pub fn instance_dir(root: &Path, instance: &str) -> Result<PathBuf> {
    let dir = root.join(instance);
    std::fs::create_dir_all(&dir).map_err(|source| Error::io(&dir, source))?;
    Ok(dir)
}

/// Primary data file for a database inside an instance directory.
pub fn data_file(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.{DATA_EXT}"))
}

/// Transaction log file paired with [`data_file`].
pub fn log_file(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}{LOG_SUFFIX}"))
}

/// Location of the uniqueness-token marker file.
pub fn marker_file(dir: &Path) -> PathBuf {
    dir.join(MARKER_FILE)
}

/// Validate an instance or database name: non-empty, at most 64 characters,
/// restricted to `[A-Za-z0-9_-]`. Names are embedded in file paths and in
/// command text, so anything outside the safe set is rejected up front.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidName {
            name: name.to_string(),
            reason: "name must not be empty".to_string(),
        });
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Error::InvalidName {
            name: name.to_string(),
            reason: format!("name exceeds {MAX_NAME_LEN} characters"),
        });
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(Error::InvalidName {
            name: name.to_string(),
            reason: format!("character '{bad}' is not allowed"),
        });
    }
    Ok(())
}
