//! Publishing dists and keeping the index pages up to date.

use std::path::{Path, PathBuf};

use eyre::Result;
use itertools::Itertools;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::*;

use crate::index::{
    build_index, package_index_title, IndexItem, IndexKind, INDEX_HTML, ROOT_INDEX_TITLE,
};
use crate::storage::Storage;
use crate::util::config::ContentHash;

pub mod dist;

pub use dist::{filter_pkg_dists, find_pkg_dists, normalized_name, normalized_version, Dist};

pub const SHA256_SUFFIX: &str = ".sha256";

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("no package distribution found in path {0}")]
    DistNotFound(PathBuf),

    #[error("invalid version {version:?}: {reason}")]
    InvalidVersion { version: String, reason: String },
}

/// What a publish run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub uploaded: Vec<Dist>,
    pub skipped: Vec<Dist>,
    pub reindexed: bool,
}

impl PublishReport {
    /// Write the index path of every uploaded dist to `path`, one per line.
    pub async fn write_to(&self, path: &Path) -> Result<()> {
        let mut output = self
            .uploaded
            .iter()
            .map(|d| format!("{}/{}", d.normalized_name, d.artifact))
            .join("\n");
        if !output.is_empty() {
            output.push('\n');
        }

        tokio::fs::write(path, output).await?;
        info!("wrote report to {}", path.display());
        Ok(())
    }
}

/// Publishes dists into one storage and regenerates its index pages. This is
/// the main entrypoint for library users.
pub struct Publisher<'a> {
    storage: &'a dyn Storage,
    content_hash: ContentHash,
}

impl<'a> Publisher<'a> {
    pub fn new(storage: &'a dyn Storage, content_hash: ContentHash) -> Self {
        Self {
            storage,
            content_hash,
        }
    }

    /// Upload every dist of `name` at `version` found in
    /// `project_path/dist_dir` that isn't in the index yet. The package and
    /// root index pages are only rebuilt when something was uploaded.
    pub async fn publish_package(
        &self,
        name: &str,
        version: &str,
        project_path: &Path,
        dist_dir: &Path,
    ) -> Result<PublishReport> {
        let version = normalized_version(version)?;
        let dists = find_pkg_dists(project_path, dist_dir, name, &version).await?;
        if dists.is_empty() {
            return Err(PublishError::DistNotFound(project_path.join(dist_dir)).into());
        }

        info!("publishing {} dists of {name} {version}", dists.len());
        let mut report = PublishReport::default();
        for dist in dists {
            if self.is_dist_published(&dist).await? {
                debug!("dist already published: {} [skipping]", dist.artifact);
                report.skipped.push(dist);
            } else {
                info!("trying to publish dist: {}", dist.artifact);
                self.upload_dist(&dist).await?;
                report.uploaded.push(dist);
            }
        }

        if let Some(dist) = report.uploaded.first() {
            info!("updating index");
            self.update_pkg_index(&dist.normalized_name).await?;
            self.update_root_index().await?;
            report.reindexed = true;
        } else {
            debug!("no index update required as no new dists uploaded");
        }

        Ok(report)
    }

    /// Rebuild the package and root index pages from what's already stored.
    pub async fn reindex_package(&self, name: &str) -> Result<()> {
        let normalized = normalized_name(name);
        self.update_pkg_index(&normalized).await?;
        self.update_root_index().await
    }

    pub async fn is_dist_published(&self, dist: &Dist) -> Result<bool> {
        let path = self.dist_dest(dist);
        info!("ensuring dist is not already published: {path}");
        self.storage.path_exists(&path).await
    }

    pub async fn upload_dist(&self, dist: &Dist) -> Result<()> {
        info!("uploading dist: {}", dist.artifact);
        let dest = self.dist_dest(dist);
        self.storage.put_file(&dist.path, &dest, true).await?;

        if self.content_hash == ContentHash::Sha256 {
            let digest = sha256_file(&dist.path).await?;
            debug!("sha256 of {} is {digest}", dist.artifact);
            self.storage
                .put_contents(&digest, &format!("{dest}{SHA256_SUFFIX}"))
                .await?;
        }

        Ok(())
    }

    pub async fn update_pkg_index(&self, normalized_name: &str) -> Result<()> {
        info!("updating index for package: {normalized_name}");
        let entries = self.storage.listdir(normalized_name).await?;

        let mut items = vec![];
        for artifact in entries
            .iter()
            .filter(|e| is_dist_entry(e))
            .sorted()
        {
            let mut item = IndexItem::new(artifact.as_str());
            if self.content_hash == ContentHash::Sha256 {
                let sidecar = format!("{artifact}{SHA256_SUFFIX}");
                if entries.contains(&sidecar) {
                    let path = self.storage.join_path(&[normalized_name, &sidecar]);
                    let digest = self.storage.get_contents(&path).await?;
                    item = item.with_sha256(String::from_utf8_lossy(&digest).trim());
                } else {
                    warn!("no {SHA256_SUFFIX} recorded for {artifact}, linking without a hash");
                }
            }
            items.push(item);
        }

        let index = build_index(
            &package_index_title(normalized_name),
            &items,
            IndexKind::Package,
        )?;
        let index_path = self.storage.join_path(&[normalized_name, INDEX_HTML]);
        self.storage.put_contents(&index, &index_path).await
    }

    pub async fn update_root_index(&self) -> Result<()> {
        info!("updating repository index");
        let items = self
            .storage
            .listdir(".")
            .await?
            .into_iter()
            .filter(|p| p != INDEX_HTML)
            .sorted()
            .map(IndexItem::new)
            .collect::<Vec<_>>();

        let index = build_index(ROOT_INDEX_TITLE, &items, IndexKind::Root)?;
        self.storage
            .put_contents(&index, &self.storage.join_path(&[INDEX_HTML]))
            .await
    }

    fn dist_dest(&self, dist: &Dist) -> String {
        self.storage
            .join_path(&[&dist.normalized_name, &dist.artifact])
    }
}

/// Whether a package directory entry should be linked from its index page.
fn is_dist_entry(entry: &str) -> bool {
    entry != INDEX_HTML && !entry.ends_with(SHA256_SUFFIX) && !entry.ends_with('/')
}

async fn sha256_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0; 64 * 1024];
    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use crate::fs::TempDir;
    use crate::storage::{LocalFileSystemStorage, ObjectStoreStorage, StorageError};

    use super::*;

    #[ctor::ctor]
    fn init() {
        crate::util::test_init();
    }

    const ABC_WHEEL: &str = "abc-0.1.0-py2-none-any.whl";
    const ABC_SDIST: &str = "abc-0.1.0.tar.gz";

    async fn project_with_dists(files: &[&str]) -> Result<TempDir> {
        let project = TempDir::new().await?;
        let dist_dir = project.path_view().join("dist");
        tokio::fs::create_dir_all(&dist_dir).await?;
        for file in files {
            tokio::fs::write(dist_dir.join(file), format!("contents of {file}")).await?;
        }
        Ok(project)
    }

    async fn read_index(storage: &dyn Storage, path: &str) -> Result<String> {
        Ok(String::from_utf8(storage.get_contents(path).await?)?)
    }

    #[tokio::test]
    async fn test_publish_uploads_everything_new() -> Result<()> {
        let project = project_with_dists(&[ABC_WHEEL, ABC_SDIST, "abc-0.0.1.tar.gz"]).await?;
        let storage = ObjectStoreStorage::in_memory(Some("simple"));
        let publisher = Publisher::new(&storage, ContentHash::None);

        let report = publisher
            .publish_package("abc", "0.1.0", &project.path_view(), Path::new("dist"))
            .await?;

        let uploaded = report.uploaded.iter().map(|d| d.artifact.as_str()).collect_vec();
        assert_eq!(uploaded, vec![ABC_WHEEL, ABC_SDIST]);
        assert!(report.skipped.is_empty());
        assert!(report.reindexed);

        assert!(storage.path_exists("abc/abc-0.1.0.tar.gz").await?);
        assert!(!storage.path_exists("abc/abc-0.0.1.tar.gz").await?);

        let pkg_index = read_index(&storage, "abc/index.html").await?;
        assert!(pkg_index.contains("<h1>Links for abc</h1>"));
        assert!(pkg_index.contains(&format!(r#"<a href="{ABC_SDIST}">{ABC_SDIST}</a>"#)));
        assert!(pkg_index.contains(&format!(r#"<a href="{ABC_WHEEL}">{ABC_WHEEL}</a>"#)));
        assert!(!pkg_index.contains(r#"href="index.html""#));

        let root_index = read_index(&storage, "index.html").await?;
        assert!(root_index.contains("<title>Private Index</title>"));
        assert!(root_index.contains(r#"<a href="abc/">abc/</a>"#));
        assert!(!root_index.contains(r#"href="index.html""#));

        Ok(())
    }

    #[tokio::test]
    async fn test_publish_skips_published_dists() -> Result<()> {
        let project = project_with_dists(&[ABC_WHEEL, ABC_SDIST]).await?;
        let storage = ObjectStoreStorage::in_memory(None);
        storage.put_contents("already here", &format!("abc/{ABC_WHEEL}")).await?;
        let publisher = Publisher::new(&storage, ContentHash::None);

        let report = publisher
            .publish_package("abc", "0.1.0", &project.path_view(), Path::new("dist"))
            .await?;

        assert_eq!(report.uploaded.len(), 1);
        assert_eq!(report.uploaded[0].artifact, ABC_SDIST);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].artifact, ABC_WHEEL);
        assert!(report.reindexed);

        // the already-published wheel is left untouched
        assert_eq!(
            storage.get_contents(&format!("abc/{ABC_WHEEL}")).await?,
            b"already here"
        );
        let pkg_index = read_index(&storage, "abc/index.html").await?;
        assert!(pkg_index.contains(ABC_WHEEL));
        assert!(pkg_index.contains(ABC_SDIST));

        Ok(())
    }

    #[tokio::test]
    async fn test_publish_without_new_dists_leaves_index_alone() -> Result<()> {
        let project = project_with_dists(&[ABC_WHEEL, ABC_SDIST]).await?;
        let storage = ObjectStoreStorage::in_memory(None);
        storage.put_contents("wheel", &format!("abc/{ABC_WHEEL}")).await?;
        storage.put_contents("sdist", &format!("abc/{ABC_SDIST}")).await?;
        let publisher = Publisher::new(&storage, ContentHash::None);

        let report = publisher
            .publish_package("abc", "0.1.0", &project.path_view(), Path::new("dist"))
            .await?;

        assert!(report.uploaded.is_empty());
        assert_eq!(report.skipped.len(), 2);
        assert!(!report.reindexed);
        assert!(!storage.path_exists("abc/index.html").await?);
        assert!(!storage.path_exists("index.html").await?);

        Ok(())
    }

    #[tokio::test]
    async fn test_publish_errors() -> Result<()> {
        let project = project_with_dists(&["FooBar-3.2.0.tar.gz"]).await?;
        let storage = ObjectStoreStorage::in_memory(None);
        let publisher = Publisher::new(&storage, ContentHash::None);

        let err = publisher
            .publish_package("abc", "0.1.0", &project.path_view(), Path::new("dist"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PublishError>(),
            Some(PublishError::DistNotFound(path)) if path.ends_with("dist")
        ));

        let err = publisher
            .publish_package("abc", "latest", &project.path_view(), Path::new("dist"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PublishError>(),
            Some(PublishError::InvalidVersion { .. })
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_publish_normalizes_package_directory() -> Result<()> {
        let project = project_with_dists(&["Foo.Bar-1.0b2.tar.gz"]).await?;
        let storage = ObjectStoreStorage::in_memory(None);
        let publisher = Publisher::new(&storage, ContentHash::None);

        publisher
            .publish_package("Foo.Bar", "1.0-beta2", &project.path_view(), Path::new("dist"))
            .await?;

        assert!(storage.path_exists("foo-bar/Foo.Bar-1.0b2.tar.gz").await?);
        let pkg_index = read_index(&storage, "foo-bar/index.html").await?;
        assert!(pkg_index.contains("<title>Links for foo-bar</title>"));
        let root_index = read_index(&storage, "index.html").await?;
        assert!(root_index.contains(r#"<a href="foo-bar/">foo-bar/</a>"#));

        Ok(())
    }

    #[tokio::test]
    async fn test_publish_with_sha256_links() -> Result<()> {
        let project = project_with_dists(&[ABC_SDIST]).await?;
        let storage = ObjectStoreStorage::in_memory(None);
        // published before hashing was switched on
        storage.put_contents("old", "abc/abc-0.0.9.tar.gz").await?;
        let publisher = Publisher::new(&storage, ContentHash::Sha256);

        publisher
            .publish_package("abc", "0.1.0", &project.path_view(), Path::new("dist"))
            .await?;

        let expected = hex::encode(Sha256::digest(format!("contents of {ABC_SDIST}")));
        let sidecar = storage.get_contents("abc/abc-0.1.0.tar.gz.sha256").await?;
        assert_eq!(String::from_utf8(sidecar)?, expected);

        let pkg_index = read_index(&storage, "abc/index.html").await?;
        assert!(pkg_index.contains(&format!(
            r#"<a href="{ABC_SDIST}#sha256={expected}">{ABC_SDIST}</a>"#
        )));
        assert!(pkg_index.contains(r#"<a href="abc-0.0.9.tar.gz">abc-0.0.9.tar.gz</a>"#));
        assert!(!pkg_index.contains(">abc-0.1.0.tar.gz.sha256<"));

        Ok(())
    }

    #[tokio::test]
    async fn test_reindex_on_local_filesystem() -> Result<()> {
        let index_dir = TempDir::new().await?;
        let storage = LocalFileSystemStorage::new(index_dir.path_view());
        let publisher = Publisher::new(&storage, ContentHash::None);

        let err = publisher.reindex_package("abc").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StorageError>(),
            Some(StorageError::PathNotFound(_))
        ));

        storage.put_contents("sdist", "abc/abc-0.1.0.tar.gz").await?;
        storage.put_contents("sdist", "zed/zed-2.0.tar.gz").await?;
        publisher.reindex_package("ABC").await?;

        let pkg_index = read_index(&storage, "abc/index.html").await?;
        assert!(pkg_index.contains(r#"<a href="abc-0.1.0.tar.gz">abc-0.1.0.tar.gz</a>"#));
        let root_index = read_index(&storage, "index.html").await?;
        let abc = root_index.find(r#"href="abc/""#);
        let zed = root_index.find(r#"href="zed/""#);
        assert!(abc.is_some() && zed.is_some() && abc < zed);
        assert!(!root_index.contains(r#"href="index.html""#));

        Ok(())
    }

    #[tokio::test]
    async fn test_report_file() -> Result<()> {
        let tmp = TempDir::new().await?;
        let report = PublishReport {
            uploaded: vec![Dist {
                pkg: "Foo.Bar".into(),
                normalized_name: "foo-bar".into(),
                artifact: "Foo.Bar-1.0.tar.gz".into(),
                path: tmp.path_view().join("Foo.Bar-1.0.tar.gz"),
            }],
            skipped: vec![],
            reindexed: true,
        };

        let report_path = tmp.path_view().join("report.txt");
        report.write_to(&report_path).await?;
        assert_eq!(
            tokio::fs::read_to_string(&report_path).await?,
            "foo-bar/Foo.Bar-1.0.tar.gz\n"
        );

        PublishReport::default().write_to(&report_path).await?;
        assert_eq!(tokio::fs::read_to_string(&report_path).await?, "");

        Ok(())
    }
}
