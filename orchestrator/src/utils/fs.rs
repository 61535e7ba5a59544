use std::io::Write;
use std::path::Path;

/// Write `content` to a temp file next to `path`, then rename it over `path`.
///
/// Readers see either the old content or the new one, never a partial write.
/// Missing parent directories are created.
pub fn atomic_write(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let mut file = tempfile::NamedTempFile::new_in(parent)?;
    file.write_all(content)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".rollout").join("tracking.json");

        atomic_write(&path, b"{}").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
    }

    #[test]
    fn replaces_existing_content_without_leftovers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("foundry.toml");
        std::fs::write(&path, "original").unwrap();

        atomic_write(&path, b"replaced").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "replaced");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
