//! Database repository for packages, the version ledger, users and credentials.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::errors::AppError;
use crate::models::{
    Category, CreatePackageRequest, Credential, NewPackageVersion, Package, PackageData,
    PackageImages, PackageVersion, User,
};

const PACKAGE_COLUMNS: &str = "id, slug, description, remote_folder_url, remote_folder_id, category, publish_date, created_at, last_fetched_date, cached_article_preview, images, data, processing";

/// Database repository for all relational data.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ==================== PACKAGE OPERATIONS ====================

    /// List packages, newest publish date first, optionally filtered by category.
    pub async fn list_packages(&self, category: Option<Category>) -> Result<Vec<Package>, AppError> {
        let rows = match category {
            Some(category) => {
                sqlx::query(&format!(
                    "SELECT {PACKAGE_COLUMNS} FROM packages WHERE category = ? ORDER BY publish_date DESC, slug"
                ))
                .bind(category.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {PACKAGE_COLUMNS} FROM packages ORDER BY publish_date DESC, slug"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.iter().map(package_from_row).collect())
    }

    /// Get a package by slug.
    pub async fn get_package(&self, slug: &str) -> Result<Option<Package>, AppError> {
        let row = sqlx::query(&format!("SELECT {PACKAGE_COLUMNS} FROM packages WHERE slug = ?"))
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(package_from_row))
    }

    /// Get a package by slug, only if it belongs to `category`.
    pub async fn get_package_in_category(
        &self,
        category: Category,
        slug: &str,
    ) -> Result<Option<Package>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {PACKAGE_COLUMNS} FROM packages WHERE category = ? AND slug = ?"
        ))
        .bind(category.as_str())
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(package_from_row))
    }

    /// Create a new package. The remote folder is attached later by provisioning.
    pub async fn create_package(&self, request: &CreatePackageRequest) -> Result<Package, AppError> {
        let mut package = Package::new(request.slug.trim());
        package.description = request.description.clone().unwrap_or_default();
        package.remote_folder_url = request
            .remote_folder_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string);
        package.category = request.category.unwrap_or_default();
        package.publish_date = request.publish_date.clone();

        let images = serde_json::to_string(&package.images)?;
        let data = serde_json::to_string(&package.data)?;

        sqlx::query(&format!(
            "INSERT INTO packages ({PACKAGE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&package.id)
        .bind(&package.slug)
        .bind(&package.description)
        .bind(&package.remote_folder_url)
        .bind(&package.remote_folder_id)
        .bind(package.category.as_str())
        .bind(&package.publish_date)
        .bind(&package.created_at)
        .bind(&package.last_fetched_date)
        .bind(&package.cached_article_preview)
        .bind(&images)
        .bind(&data)
        .bind(package.processing as i32)
        .execute(&self.pool)
        .await?;

        Ok(package)
    }

    /// Write every mutable column of a package back, keyed by slug.
    pub async fn save_package(&self, package: &Package) -> Result<(), AppError> {
        let images = serde_json::to_string(&package.images)?;
        let data = serde_json::to_string(&package.data)?;

        let result = sqlx::query(
            r#"
            UPDATE packages SET
                description = ?, remote_folder_url = ?, remote_folder_id = ?, category = ?,
                publish_date = ?, last_fetched_date = ?, cached_article_preview = ?,
                images = ?, data = ?, processing = ?
            WHERE slug = ?
            "#,
        )
        .bind(&package.description)
        .bind(&package.remote_folder_url)
        .bind(&package.remote_folder_id)
        .bind(package.category.as_str())
        .bind(&package.publish_date)
        .bind(&package.last_fetched_date)
        .bind(&package.cached_article_preview)
        .bind(&images)
        .bind(&data)
        .bind(package.processing as i32)
        .bind(&package.slug)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Package {} not found",
                package.slug
            )));
        }

        Ok(())
    }

    /// Write only the columns a fetch owns. Edits made to the rest of the row while
    /// the fetch was running are left alone.
    pub async fn save_fetch_state(&self, package: &Package) -> Result<(), AppError> {
        let images = serde_json::to_string(&package.images)?;
        let data = serde_json::to_string(&package.data)?;

        let result = sqlx::query(
            r#"
            UPDATE packages SET
                last_fetched_date = ?, cached_article_preview = ?,
                images = ?, data = ?, processing = ?
            WHERE slug = ?
            "#,
        )
        .bind(&package.last_fetched_date)
        .bind(&package.cached_article_preview)
        .bind(&images)
        .bind(&data)
        .bind(package.processing as i32)
        .bind(&package.slug)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Package {} not found",
                package.slug
            )));
        }

        Ok(())
    }

    /// Delete a package together with its version history.
    pub async fn delete_package(&self, slug: &str) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM package_versions WHERE package_id IN (SELECT id FROM packages WHERE slug = ?)",
        )
        .bind(slug)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query("DELETE FROM packages WHERE slug = ?")
            .bind(slug)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Package {} not found", slug)));
        }

        tx.commit().await?;

        Ok(())
    }

    // ==================== VERSION LEDGER ====================

    /// Append a version snapshot.
    pub async fn insert_version(&self, version: &NewPackageVersion) -> Result<PackageVersion, AppError> {
        let now = Utc::now().to_rfc3339();
        let data = serde_json::to_string(&version.data)?;

        let result = sqlx::query(
            "INSERT INTO package_versions (package_id, article_text, data, creator_id, description, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&version.package_id)
        .bind(&version.article_text)
        .bind(&data)
        .bind(&version.creator_id)
        .bind(&version.description)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(PackageVersion {
            id: result.last_insert_rowid(),
            package_id: version.package_id.clone(),
            article_text: version.article_text.clone(),
            data: version.data.clone(),
            creator_id: version.creator_id.clone(),
            description: version.description.clone(),
            created_at: now,
        })
    }

    /// Versions of a package, newest first.
    pub async fn list_versions(&self, package_id: &str) -> Result<Vec<PackageVersion>, AppError> {
        let rows = sqlx::query(
            "SELECT id, package_id, article_text, data, creator_id, description, created_at FROM package_versions WHERE package_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(package_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(version_from_row).collect())
    }

    // ==================== USER OPERATIONS ====================

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let row = sqlx::query(
            "SELECT id, email, display_name, created_at FROM users WHERE lower(email) = lower(?)",
        )
        .bind(email.trim())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(user_from_row))
    }

    /// Create the user for `email`, or refresh the display name of an existing one.
    pub async fn upsert_user(&self, email: &str, display_name: &str) -> Result<User, AppError> {
        if let Some(mut user) = self.get_user_by_email(email).await? {
            if !display_name.is_empty() && user.display_name != display_name {
                sqlx::query("UPDATE users SET display_name = ? WHERE id = ?")
                    .bind(display_name)
                    .bind(&user.id)
                    .execute(&self.pool)
                    .await?;
                user.display_name = display_name.to_string();
            }
            return Ok(user);
        }

        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            email: email.trim().to_string(),
            display_name: display_name.to_string(),
            created_at: Utc::now().to_rfc3339(),
        };
        sqlx::query("INSERT INTO users (id, email, display_name, created_at) VALUES (?, ?, ?, ?)")
            .bind(&user.id)
            .bind(&user.email)
            .bind(&user.display_name)
            .bind(&user.created_at)
            .execute(&self.pool)
            .await?;

        Ok(user)
    }

    // ==================== CREDENTIAL OPERATIONS ====================

    pub async fn get_credential(&self, user_id: &str) -> Result<Option<Credential>, AppError> {
        let row = sqlx::query(
            "SELECT user_id, access_token, refresh_token, token_type, scope, expires_at, updated_at FROM credentials WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(credential_from_row))
    }

    /// Insert or replace the credential for its user.
    pub async fn save_credential(&self, credential: &Credential) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO credentials (user_id, access_token, refresh_token, token_type, scope, expires_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                token_type = excluded.token_type,
                scope = excluded.scope,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&credential.user_id)
        .bind(&credential.access_token)
        .bind(&credential.refresh_token)
        .bind(&credential.token_type)
        .bind(&credential.scope)
        .bind(credential.expires_at.map(|t| t.to_rfc3339()))
        .bind(credential.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

// Helper functions for row conversion

fn package_from_row(row: &sqlx::sqlite::SqliteRow) -> Package {
    let category: String = row.get("category");
    let images: String = row.get("images");
    let data: String = row.get("data");
    let processing: i32 = row.get("processing");
    Package {
        id: row.get("id"),
        slug: row.get("slug"),
        description: row.get("description"),
        remote_folder_url: row.get("remote_folder_url"),
        remote_folder_id: row.get("remote_folder_id"),
        category: Category::from_str(&category).unwrap_or_default(),
        publish_date: row.get("publish_date"),
        created_at: row.get("created_at"),
        last_fetched_date: row.get("last_fetched_date"),
        cached_article_preview: row.get("cached_article_preview"),
        images: parse_json::<PackageImages>(&images),
        data: parse_json::<PackageData>(&data),
        processing: processing != 0,
    }
}

fn version_from_row(row: &sqlx::sqlite::SqliteRow) -> PackageVersion {
    let data: String = row.get("data");
    PackageVersion {
        id: row.get("id"),
        package_id: row.get("package_id"),
        article_text: row.get("article_text"),
        data: parse_json::<PackageData>(&data),
        creator_id: row.get("creator_id"),
        description: row.get("description"),
        created_at: row.get("created_at"),
    }
}

fn user_from_row(row: &sqlx::sqlite::SqliteRow) -> User {
    User {
        id: row.get("id"),
        email: row.get("email"),
        display_name: row.get("display_name"),
        created_at: row.get("created_at"),
    }
}

fn credential_from_row(row: &sqlx::sqlite::SqliteRow) -> Credential {
    let expires_at: Option<String> = row.get("expires_at");
    let updated_at: String = row.get("updated_at");
    Credential {
        user_id: row.get("user_id"),
        access_token: row.get("access_token"),
        refresh_token: row.get("refresh_token"),
        token_type: row.get("token_type"),
        scope: row.get("scope"),
        expires_at: expires_at.as_deref().and_then(parse_time),
        updated_at: parse_time(&updated_at).unwrap_or_else(Utc::now),
    }
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn parse_json<T: serde::de::DeserializeOwned + Default>(s: &str) -> T {
    serde_json::from_str(s).unwrap_or_default()
}
