use crate::config::{LEGACY_REPO_FILE, REPO_FILE};
use std::io;
use std::path::Path;
use tokio::fs;

/// Leave `root` as an empty directory, whatever was there before.
pub(crate) async fn setup_repo_root(root: &Path) -> io::Result<()> {
    clear_repo_root(root).await?;
    fs::create_dir_all(root).await
}

pub(crate) async fn clear_repo_root(root: &Path) -> io::Result<()> {
    match fs::remove_dir_all(root).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

pub(crate) async fn is_valid_repo_root(root: &Path) -> bool {
    fs::try_exists(root.join(REPO_FILE)).await.unwrap_or(false)
        || fs::try_exists(root.join(LEGACY_REPO_FILE))
            .await
            .unwrap_or(false)
}

/// Make sure a fetched directory carries the repository marker, creating an
/// empty one (and, when asked for, the legacy one) if the rule did not.
///
pub(crate) async fn ensure_repo_markers(root: &Path, legacy: bool) -> io::Result<()> {
    if is_valid_repo_root(root).await {
        return Ok(());
    }
    fs::File::create(root.join(REPO_FILE)).await?;
    if legacy {
        fs::File::create(root.join(LEGACY_REPO_FILE)).await?;
    }
    Ok(())
}
