use std::path::Path;
use tokio::fs;
use crate::utils::{HdrResult, PathError};

/// Checks that a picked or dropped path is a readable regular file and
/// returns its size in bytes.
pub async fn validate_input_path(path: impl AsRef<Path>) -> HdrResult<u64> {
    let path = path.as_ref();
    let metadata = match fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PathError::NotFound(path.to_path_buf()).into());
        }
        Err(e) => return Err(PathError::from(e).into()),
    };

    if !metadata.is_file() {
        return Err(PathError::NotFile(path.to_path_buf()).into());
    }

    Ok(metadata.len())
}

/// Final path component as a display name, falling back to the full path
pub fn extract_filename(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}
