//! Bulk import of policy files from a directory tree.

use std::path::Path;

use papl_core::{PaplResult, SaveStatus, Stamp, StoreError, PATH_SEPARATOR};
use papl_storage::VersionedStore;
use walkdir::WalkDir;

/// Save every file under `dir` whose extension is `extension` into `store`.
///
/// Keys are the file paths relative to `dir`, joined with `/` regardless of
/// platform (`dir/a/b/policy.rego` is stored as `a/b/policy.rego`). Files are
/// visited in name order. Returns the number of files saved.
///
/// # Errors
///
/// Fails on the first unreadable entry or rejected save. Files saved before
/// the failure stay saved.
pub fn import_bundle(
    store: &dyn VersionedStore,
    dir: impl AsRef<Path>,
    extension: &str,
    version: &str,
    stamp: Stamp,
) -> PaplResult<usize> {
    let dir = dir.as_ref();
    let mut imported = 0;

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| StoreError::Io {
            reason: e.to_string(),
        })?;
        let path = entry.path();
        let matches = path.extension().and_then(|e| e.to_str()) == Some(extension);
        if !entry.file_type().is_file() || !matches {
            continue;
        }

        let key = bundle_key(dir, path)?;
        let text = std::fs::read_to_string(path).map_err(|e| StoreError::Io {
            reason: format!("{}: {}", path.display(), e),
        })?;

        let status = store.save(&key, &text, version, stamp);
        if !status.is_success() {
            return Err(save_error(status, &key).into());
        }
        tracing::debug!(key = %key, "imported policy file");
        imported += 1;
    }

    tracing::info!(dir = %dir.display(), imported, "bundle imported");
    Ok(imported)
}

fn bundle_key(root: &Path, file: &Path) -> PaplResult<String> {
    let relative = file.strip_prefix(root).map_err(|e| StoreError::Io {
        reason: format!("{}: {}", file.display(), e),
    })?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join(&PATH_SEPARATOR.to_string()))
}

fn save_error(status: SaveStatus, key: &str) -> StoreError {
    if status == SaveStatus::UNINITIALIZED {
        StoreError::NotInitialized
    } else {
        StoreError::Backend {
            reason: format!("save of {} failed with status {}", key, status),
        }
    }
}
