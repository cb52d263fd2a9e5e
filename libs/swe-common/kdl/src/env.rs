use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

pub const SCHEMA_DIR_VAR: &str = "SWE_SCHEMA_DIR";

/// Why the schema directory setting was ignored.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SchemaDirError {
    #[error("schema directory {0:?} from {SCHEMA_DIR_VAR} does not exist")]
    Missing(PathBuf),
    #[error("{SCHEMA_DIR_VAR} points at {0:?}, which is a file rather than a directory")]
    NotADirectory(PathBuf),
}

fn check_dir(dir: PathBuf) -> Result<PathBuf, SchemaDirError> {
    match dir.metadata() {
        Err(_) => Err(SchemaDirError::Missing(dir)),
        Ok(meta) if !meta.is_dir() => Err(SchemaDirError::NotADirectory(dir)),
        Ok(_) => Ok(dir),
    }
}

/// The directory schema documents are looked up in, when [`SCHEMA_DIR_VAR`] is set.
pub fn schema_dir() -> Result<Option<PathBuf>, SchemaDirError> {
    std::env::var_os(SCHEMA_DIR_VAR)
        .map(|dir| check_dir(PathBuf::from(dir)))
        .transpose()
}

/// Absolute paths are returned unchanged; relative ones are joined to the schema directory
/// when it is usable and left relative to the working directory otherwise.
pub fn schema_file(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match schema_dir() {
        Ok(Some(dir)) => dir.join(path),
        Ok(None) => path.to_path_buf(),
        Err(err) => {
            warn!(%err, "resolving schema against the working directory");
            path.to_path_buf()
        }
    }
}
