use std::path::{Path, PathBuf};
use url::Url;

/// Resolves markup attribute values that name assets to local files.
///
/// A value that does not name an existing file resolves to `None`.
pub trait AssetLocator: Send + Sync {
    fn resolve(&self, value: &str) -> Option<PathBuf>;
}

/// Resolves assets relative to the previewed item and its project.
#[derive(Debug, Clone)]
pub struct DirectoryAssetLocator {
    item_dir: PathBuf,
    project_dir: Option<PathBuf>,
}

impl DirectoryAssetLocator {
    pub fn new(item_dir: impl Into<PathBuf>, project_dir: Option<PathBuf>) -> Self {
        Self {
            item_dir: item_dir.into(),
            project_dir,
        }
    }

    fn root(&self) -> &Path {
        self.project_dir.as_deref().unwrap_or(&self.item_dir)
    }
}

impl AssetLocator for DirectoryAssetLocator {
    fn resolve(&self, value: &str) -> Option<PathBuf> {
        let value = value.trim();
        if value.is_empty() || value.starts_with('{') {
            // markup extensions are resolved by the host
            return None;
        }

        let candidate = if let Some(rest) = value.strip_prefix("avares://") {
            // avares://<assembly>/<path>
            let (_, path) = rest.split_once('/')?;
            self.root().join(path)
        } else if value.starts_with("resm:") {
            return None;
        } else if let Ok(url) = Url::parse(value) {
            if url.scheme() != "file" {
                return None;
            }
            url.to_file_path().ok()?
        } else if let Some(rest) = value.strip_prefix('/') {
            self.root().join(rest)
        } else {
            self.item_dir.join(value)
        };

        candidate.is_file().then_some(candidate)
    }
}

/// Formats a local path as a `file://` reference usable in markup.
pub fn file_reference(path: &Path) -> Option<String> {
    Url::from_file_path(path).ok().map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fixture() -> (tempfile::TempDir, DirectoryAssetLocator) {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("Assets")).unwrap();
        fs::create_dir_all(dir.path().join("Views")).unwrap();
        fs::write(dir.path().join("Assets/logo.png"), b"png").unwrap();
        fs::write(dir.path().join("Views/local.png"), b"png").unwrap();
        let locator =
            DirectoryAssetLocator::new(dir.path().join("Views"), Some(dir.path().to_path_buf()));
        (dir, locator)
    }

    #[test]
    fn test_resolve_avares_and_rooted() {
        let (dir, locator) = fixture();
        let expected = dir.path().join("Assets/logo.png");
        assert_eq!(locator.resolve("avares://App/Assets/logo.png"), Some(expected.clone()));
        assert_eq!(locator.resolve("/Assets/logo.png"), Some(expected));
    }

    #[test]
    fn test_resolve_relative_to_item() {
        let (dir, locator) = fixture();
        assert_eq!(locator.resolve("local.png"), Some(dir.path().join("Views/local.png")));
    }

    #[test]
    fn test_missing_and_unsupported_are_none() {
        let (_dir, locator) = fixture();
        assert_eq!(locator.resolve("missing.png"), None);
        assert_eq!(locator.resolve("{StaticResource Logo}"), None);
        assert_eq!(locator.resolve("resm:App.logo.png"), None);
        assert_eq!(locator.resolve("https://example.com/a.png"), None);
        assert_eq!(locator.resolve(""), None);
    }

    #[test]
    fn test_file_reference() {
        let (dir, locator) = fixture();
        let path = locator.resolve("local.png").unwrap();
        let reference = file_reference(&path).unwrap();
        assert!(reference.starts_with("file://"));
        assert_eq!(locator.resolve(&reference), Some(dir.path().join("Views/local.png")));
    }
}
