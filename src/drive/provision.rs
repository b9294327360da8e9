//! Folder provisioning for packages.
//!
//! Provisioning never fails a request: when Drive is unreachable or no credentials are
//! configured the package gets a placeholder folder link instead.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use super::{
    folder_url, normalize, placeholder_url, quote, DriveApi, DriveError, Permission,
    FOLDER_MIME, GOOGLE_DOC_MIME,
};
use crate::config::DriveSettings;
use crate::db::Repository;
use crate::errors::AppError;
use crate::models::Package;

/// Name of the starter document created in new folders.
pub const ARTICLE_DOC_NAME: &str = "article.aml";

/// Why a remote folder or document could not be ensured.
#[derive(Debug, Error)]
pub enum Unavailable {
    #[error("no Drive credentials configured")]
    NoCredentials,
    #[error(transparent)]
    Remote(#[from] DriveError),
}

/// Sharing applied to newly created folders. Public sharing wins over domain sharing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SharePolicy {
    pub public: bool,
    pub domain: Option<String>,
}

impl SharePolicy {
    pub fn permission(&self) -> Option<Permission> {
        if self.public {
            return Some(Permission::anyone("writer"));
        }
        self.domain
            .as_deref()
            .map(|domain| Permission::domain(domain, "writer"))
    }
}

/// A remote file that was found or created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRef {
    pub id: String,
    pub url: String,
}

pub struct Provisioner {
    repo: Repository,
    drive: Option<Arc<dyn DriveApi>>,
    policy: SharePolicy,
    parent_folder_id: Option<String>,
    drive_root: String,
    timeout: Duration,
}

impl Provisioner {
    pub fn new(repo: Repository, drive: Option<Arc<dyn DriveApi>>, settings: &DriveSettings) -> Self {
        Self {
            repo,
            drive,
            policy: SharePolicy {
                public: settings.share_public,
                domain: settings.share_domain.clone(),
            },
            parent_folder_id: settings.parent_folder_id.clone(),
            drive_root: settings.drive_root.clone(),
            timeout: settings.timeout,
        }
    }

    fn drive(&self) -> Result<&Arc<dyn DriveApi>, Unavailable> {
        self.drive.as_ref().ok_or(Unavailable::NoCredentials)
    }

    async fn bounded<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, DriveError>>,
    ) -> Result<T, DriveError> {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| DriveError::Timeout)?
    }

    /// Create a folder named `name` and share it per the policy. A sharing failure is
    /// logged and the folder is kept.
    pub async fn ensure_folder(&self, name: &str, parent_id: Option<&str>) -> Result<RemoteRef, Unavailable> {
        let drive = self.drive()?;
        let folder = self
            .bounded(drive.create_file(name, FOLDER_MIME, parent_id))
            .await?;

        if let Some(permission) = self.policy.permission() {
            if let Err(e) = self
                .bounded(drive.create_permission(&folder.id, &permission))
                .await
            {
                tracing::warn!(folder_id = %folder.id, "Failed to share folder: {}", e);
            }
        }

        tracing::info!(folder_id = %folder.id, name, "Created Drive folder");
        Ok(RemoteRef {
            url: folder_url(&folder.id),
            id: folder.id,
        })
    }

    /// Find the article document in a folder, creating and sharing one if none exists.
    pub async fn ensure_article_document(&self, folder_id: &str) -> Result<RemoteRef, Unavailable> {
        let drive = self.drive()?;
        let query = format!(
            "name contains 'article' and mimeType = '{}' and {} in parents",
            GOOGLE_DOC_MIME,
            quote(folder_id)
        );
        let existing = self.bounded(drive.find_files(&query)).await?;
        if let Some(doc) = existing.into_iter().next() {
            return Ok(document_ref(doc.id, doc.web_view_link));
        }

        let doc = self
            .bounded(drive.create_file(ARTICLE_DOC_NAME, GOOGLE_DOC_MIME, Some(folder_id)))
            .await?;
        if let Err(e) = self
            .bounded(drive.create_permission(&doc.id, &Permission::anyone("writer")))
            .await
        {
            tracing::debug!(doc_id = %doc.id, "Ignoring document share failure: {}", e);
        }

        tracing::info!(doc_id = %doc.id, folder_id, "Created article document");
        Ok(document_ref(doc.id, doc.web_view_link))
    }

    /// Attach a remote folder to a package and persist it.
    ///
    /// A package that already has both a folder id and a link is left untouched.
    pub async fn provision(&self, package: &mut Package) -> Result<(), AppError> {
        if package.remote_folder_id.is_some() && package.remote_folder_url.is_some() {
            return Ok(());
        }

        let folder = normalize(
            package.remote_folder_url.as_deref(),
            package.remote_folder_id.as_deref(),
        );
        package.remote_folder_id = folder.id;
        package.remote_folder_url = folder.url;

        if package.remote_folder_url.is_none() {
            match self
                .ensure_folder(&package.slug, self.parent_folder_id.as_deref())
                .await
            {
                Ok(created) => {
                    package.remote_folder_id = Some(created.id);
                    package.remote_folder_url = Some(created.url);
                }
                Err(e) => {
                    tracing::warn!(slug = %package.slug, "Using placeholder folder link: {}", e);
                    package.remote_folder_url = Some(placeholder_url(&self.drive_root, &package.slug));
                }
            }
        }

        self.repo.save_package(package).await?;

        if let Some(folder_id) = package.remote_folder_id.as_deref() {
            if let Err(e) = self.ensure_article_document(folder_id).await {
                tracing::warn!(slug = %package.slug, "Could not ensure article document: {}", e);
            }
        }

        Ok(())
    }
}

fn document_ref(id: String, web_view_link: Option<String>) -> RemoteRef {
    let url = web_view_link
        .filter(|link| !link.is_empty())
        .unwrap_or_else(|| format!("https://docs.google.com/document/d/{}/edit", id));
    RemoteRef { id, url }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::init_database;
    use crate::drive::fake::FakeDrive;
    use crate::models::{Category, CreatePackageRequest};
    use tempfile::TempDir;

    async fn setup(
        drive: Option<Arc<FakeDrive>>,
        settings: DriveSettings,
    ) -> (Provisioner, Repository, TempDir) {
        let dir = TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("test.db")).await.unwrap();
        let repo = Repository::new(pool);
        let drive = drive.map(|d| d as Arc<dyn DriveApi>);
        (Provisioner::new(repo.clone(), drive, &settings), repo, dir)
    }

    async fn create(repo: &Repository, slug: &str, url: Option<&str>) -> Package {
        repo.create_package(&CreatePackageRequest {
            slug: slug.into(),
            description: None,
            remote_folder_url: url.map(str::to_string),
            category: Some(Category::Prime),
            publish_date: None,
        })
        .await
        .unwrap()
    }

    #[test]
    fn test_public_sharing_wins() {
        let policy = SharePolicy {
            public: true,
            domain: Some("media.ucla.edu".into()),
        };
        assert_eq!(policy.permission(), Some(Permission::anyone("writer")));
        let policy = SharePolicy {
            public: false,
            domain: Some("media.ucla.edu".into()),
        };
        assert_eq!(
            policy.permission(),
            Some(Permission::domain("media.ucla.edu", "writer"))
        );
        assert_eq!(SharePolicy::default().permission(), None);
    }

    #[tokio::test]
    async fn test_fully_linked_package_makes_no_remote_calls() {
        let drive = Arc::new(FakeDrive::new());
        let (provisioner, repo, _dir) =
            setup(Some(drive.clone()), Config::default().drive_settings()).await;
        let mut package = create(&repo, "linked", None).await;
        package.remote_folder_id = Some("abc".into());
        package.remote_folder_url = Some(folder_url("abc"));

        provisioner.provision(&mut package).await.unwrap();
        assert_eq!(drive.call_count(), 0);
    }

    #[tokio::test]
    async fn test_pasted_link_is_normalized_and_doc_ensured() {
        let drive = Arc::new(FakeDrive::new());
        drive.add_folder("abc");
        let (provisioner, repo, _dir) =
            setup(Some(drive.clone()), Config::default().drive_settings()).await;
        let mut package = create(
            &repo,
            "pasted",
            Some("https://drive.google.com/open?id=abc"),
        )
        .await;

        provisioner.provision(&mut package).await.unwrap();

        let stored = repo.get_package("pasted").await.unwrap().unwrap();
        assert_eq!(stored.remote_folder_id.as_deref(), Some("abc"));
        assert_eq!(stored.remote_folder_url.as_deref(), Some(folder_url("abc").as_str()));
        assert_eq!(drive.created_names(), vec![ARTICLE_DOC_NAME.to_string()]);
    }

    #[tokio::test]
    async fn test_new_folder_is_created_and_shared() {
        let drive = Arc::new(FakeDrive::new());
        let mut settings = Config::default().drive_settings();
        settings.share_domain = Some("media.ucla.edu".into());
        settings.parent_folder_id = Some("repo-root".into());
        let (provisioner, repo, _dir) = setup(Some(drive.clone()), settings).await;
        let mut package = create(&repo, "fresh", None).await;

        provisioner.provision(&mut package).await.unwrap();

        let folder_id = package.remote_folder_id.clone().unwrap();
        assert_eq!(package.remote_folder_url, Some(folder_url(&folder_id)));
        assert_eq!(drive.parent_of(&folder_id).as_deref(), Some("repo-root"));
        assert!(drive
            .permissions_for(&folder_id)
            .contains(&Permission::domain("media.ucla.edu", "writer")));
        assert_eq!(
            drive.created_names(),
            vec!["fresh".to_string(), ARTICLE_DOC_NAME.to_string()]
        );
    }

    #[tokio::test]
    async fn test_existing_article_document_is_reused() {
        let drive = Arc::new(FakeDrive::new());
        drive.add_folder("abc");
        drive.add_file("abc", "doc-1", "Article draft", GOOGLE_DOC_MIME, b"");
        let (provisioner, _repo, _dir) =
            setup(Some(drive.clone()), Config::default().drive_settings()).await;

        let first = provisioner.ensure_article_document("abc").await.unwrap();
        let second = provisioner.ensure_article_document("abc").await.unwrap();
        assert_eq!(first.id, "doc-1");
        assert_eq!(first, second);
        assert!(drive.created_names().is_empty());
    }

    #[tokio::test]
    async fn test_without_credentials_placeholder_is_used() {
        let (provisioner, repo, _dir) = setup(None, Config::default().drive_settings()).await;
        let mut package = create(&repo, "Sports MBB", None).await;

        provisioner.provision(&mut package).await.unwrap();

        assert_eq!(package.remote_folder_id, None);
        assert_eq!(
            package.remote_folder_url.as_deref(),
            Some("https://drive.google.com/drive/folders/sports-mbb")
        );
        assert!(matches!(
            provisioner.ensure_folder("x", None).await,
            Err(Unavailable::NoCredentials)
        ));
    }

    #[tokio::test]
    async fn test_remote_failure_falls_back_to_placeholder() {
        let drive = Arc::new(FakeDrive::new());
        drive.fail_writes();
        let (provisioner, repo, _dir) =
            setup(Some(drive.clone()), Config::default().drive_settings()).await;
        let mut package = create(&repo, "broken", None).await;

        provisioner.provision(&mut package).await.unwrap();
        assert_eq!(
            package.remote_folder_url.as_deref(),
            Some("https://drive.google.com/drive/folders/broken")
        );
    }
}
