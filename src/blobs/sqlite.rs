//! SQLite-backed blob store sharing the application database.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use super::{asset_type, AssetEntry, AssetIndex, BlobMetadata, BlobStore, StorageError, StoredBlob};

#[derive(Clone)]
pub struct SqliteBlobStore {
    pool: SqlitePool,
}

impl SqliteBlobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BlobStore for SqliteBlobStore {
    async fn put(
        &self,
        name: &str,
        data: &[u8],
        content_type: &str,
        metadata: &BlobMetadata,
    ) -> Result<String, StorageError> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        sqlx::query(
            "INSERT INTO blobs (id, name, content_type, data, size, slug, asset_type, source, source_id, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(name)
        .bind(content_type)
        .bind(data)
        .bind(data.len() as i64)
        .bind(&metadata.slug)
        .bind(&metadata.asset_type)
        .bind(&metadata.source)
        .bind(&metadata.source_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        tracing::debug!(blob_id = %id, name, size = data.len(), "Stored blob");
        Ok(id)
    }

    async fn get(&self, id: &str) -> Result<StoredBlob, StorageError> {
        let row = sqlx::query("SELECT name, content_type, data FROM blobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;

        Ok(StoredBlob {
            name: row.get("name"),
            content_type: row.get("content_type"),
            data: row.get("data"),
        })
    }

    async fn index_assets(&self, slug: &str, assets: &[AssetEntry]) -> Result<(), StorageError> {
        let has_aml = assets.iter().any(|a| a.asset_type == asset_type::AML);
        let has_images = assets.iter().any(|a| a.asset_type == asset_type::IMAGE);
        let json = serde_json::to_string(assets)?;

        sqlx::query(
            r#"
            INSERT INTO package_assets (slug, assets, has_aml, has_images, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(slug) DO UPDATE SET
                assets = excluded.assets,
                has_aml = excluded.has_aml,
                has_images = excluded.has_images,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(slug)
        .bind(&json)
        .bind(has_aml as i32)
        .bind(has_images as i32)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn asset_index(&self, slug: &str) -> Result<Option<AssetIndex>, StorageError> {
        let Some(row) = sqlx::query(
            "SELECT slug, assets, has_aml, has_images, updated_at FROM package_assets WHERE slug = ?",
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let assets: String = row.get("assets");
        let has_aml: i32 = row.get("has_aml");
        let has_images: i32 = row.get("has_images");
        Ok(Some(AssetIndex {
            slug: row.get("slug"),
            assets: serde_json::from_str(&assets)?,
            has_aml: has_aml != 0,
            has_images: has_images != 0,
            updated_at: row.get("updated_at"),
        }))
    }
}
