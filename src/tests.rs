//! Integration tests for the Oink backend.

use std::sync::Arc;

use reqwest::Client;
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::blobs::{BlobStore, SqliteBlobStore};
use crate::config::Config;
use crate::db::{init_database, Repository};
use crate::drive::fake::FakeDrive;
use crate::drive::{DriveApi, GOOGLE_DOC_MIME};
use crate::{create_router, AppState};

const API_KEY: &str = "test-api-key";
const ARTICLE_TEXT: &str = "headline: Bruins win\n[+content]\nFirst paragraph.\n[]\n";

#[derive(Default)]
struct Options {
    psk: Option<String>,
    drive: Option<Arc<FakeDrive>>,
    blob_cache: bool,
}

/// Test fixture for integration tests.
struct TestFixture {
    client: Client,
    base_url: String,
    repo: Repository,
    temp_dir: TempDir,
}

impl TestFixture {
    async fn new() -> Self {
        Self::with(Options {
            psk: Some(API_KEY.to_string()),
            ..Default::default()
        })
        .await
    }

    async fn with_drive(drive: Arc<FakeDrive>, blob_cache: bool) -> Self {
        Self::with(Options {
            psk: Some(API_KEY.to_string()),
            drive: Some(drive),
            blob_cache,
        })
        .await
    }

    async fn with(options: Options) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.sqlite");

        // Initialize database
        let pool = init_database(&db_path).await.expect("Failed to init DB");
        let repo = Repository::new(pool.clone());
        let blobs: Arc<dyn BlobStore> = Arc::new(SqliteBlobStore::new(pool));

        let config = Config {
            api_psk: options.psk.clone(),
            db_path,
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "warn".to_string(),
            blob_cache_enabled: options.blob_cache,
            sample_data_dir: temp_dir.path().join("samples"),
            remote_timeout: std::time::Duration::from_secs(2),
            ..Config::default()
        };

        let drive = options.drive.map(|d| d as Arc<dyn DriveApi>);
        let state = AppState::new(config, repo.clone(), blobs, drive, None);
        let app = create_router(state);

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get addr");
        let base_url = format!("http://{}", addr);

        // Spawn server
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait for server to start
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        let mut client_builder = Client::builder();
        if let Some(key) = options.psk {
            let mut headers = reqwest::header::HeaderMap::new();
            headers.insert("x-api-key", key.parse().unwrap());
            client_builder = client_builder.default_headers(headers);
        }

        TestFixture {
            client: client_builder.build().unwrap(),
            base_url,
            repo,
            temp_dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn create(&self, body: Value) -> Value {
        let resp = self
            .client
            .post(self.url("/api/packages"))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["success"], true);
        body["data"].clone()
    }

    async fn fetch(&self, slug: &str) -> reqwest::Response {
        self.client
            .post(self.url(&format!("/api/packages/{}/fetch", slug)))
            .send()
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn test_health_check() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .get(fixture.url("/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_cors_headers_on_every_route() {
    let fixture = TestFixture::new().await;

    for path in ["/health", "/api/packages"] {
        let resp = fixture
            .client
            .get(fixture.url(path))
            .header("origin", "https://oink.example.com")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers()["access-control-allow-origin"], "*");
    }
}

#[tokio::test]
async fn test_auth_missing_psk() {
    let fixture = TestFixture::new().await;

    // Request without API key
    let resp = Client::new()
        .get(fixture.url("/api/packages"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_auth_bearer_and_invalid_psk() {
    let fixture = TestFixture::new().await;
    let client = Client::new();

    let resp = client
        .get(fixture.url("/api/packages"))
        .header("x-api-key", "wrong-key")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .get(fixture.url("/api/packages"))
        .bearer_auth(API_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_no_psk_configured_allows_requests() {
    let fixture = TestFixture::with(Options::default()).await;
    let resp = Client::new()
        .get(fixture.url("/api/packages"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_create_without_drive_uses_placeholder() {
    let fixture = TestFixture::new().await;

    let package = fixture
        .create(json!({"slug": "Sports MBB", "description": "Hoops"}))
        .await;
    assert_eq!(package["slug"], "Sports MBB");
    assert_eq!(package["category"], "prime");
    assert_eq!(
        package["remoteFolderUrl"],
        "https://drive.google.com/drive/folders/sports-mbb"
    );
    assert!(package.get("remoteFolderId").is_none());
    assert_eq!(package["processing"], false);
}

#[tokio::test]
async fn test_create_validation_and_conflict() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .post(fixture.url("/api/packages"))
        .json(&json!({"slug": "   "}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    fixture.create(json!({"slug": "dup"})).await;
    let resp = fixture
        .client
        .post(fixture.url("/api/packages"))
        .json(&json!({"slug": "dup"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
}

#[tokio::test]
async fn test_create_with_pasted_link_provisions_document() {
    let drive = Arc::new(FakeDrive::new());
    drive.add_folder("abc123");
    let fixture = TestFixture::with_drive(drive.clone(), false).await;

    let package = fixture
        .create(json!({
            "slug": "news.story",
            "remoteFolderUrl": "https://drive.google.com/open?id=abc123"
        }))
        .await;

    assert_eq!(package["remoteFolderId"], "abc123");
    assert_eq!(
        package["remoteFolderUrl"],
        "https://drive.google.com/drive/folders/abc123"
    );
    assert_eq!(drive.created_names(), vec!["article.aml".to_string()]);
    assert_eq!(drive.parent_of("fake-1").as_deref(), Some("abc123"));
}

#[tokio::test]
async fn test_package_crud() {
    let fixture = TestFixture::new().await;

    fixture
        .create(json!({"slug": "a.prime", "publishDate": "2024-01-01"}))
        .await;
    fixture
        .create(json!({"slug": "b.alumni", "category": "alumni", "publishDate": "2024-02-01"}))
        .await;

    // List all, newest publish date first
    let resp = fixture
        .client
        .get(fixture.url("/api/packages"))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    let slugs: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["slug"].as_str().unwrap())
        .collect();
    assert_eq!(slugs, vec!["b.alumni", "a.prime"]);

    // Filter by category
    let resp = fixture
        .client
        .get(fixture.url("/api/packages?category=alumni"))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let resp = fixture
        .client
        .get(fixture.url("/api/packages?category=sports"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Update
    let resp = fixture
        .client
        .put(fixture.url("/api/packages/a.prime"))
        .json(&json!({"description": "Updated", "category": "flatpages"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["description"], "Updated");
    assert_eq!(body["data"]["category"], "flatpages");

    // Delete
    let resp = fixture
        .client
        .delete(fixture.url("/api/packages/a.prime"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = fixture
        .client
        .get(fixture.url("/api/packages/a.prime"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let resp = fixture
        .client
        .delete(fixture.url("/api/packages/a.prime"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_get_package_by_category() {
    let fixture = TestFixture::new().await;
    fixture
        .create(json!({"slug": "b.alumni", "category": "alumni"}))
        .await;

    let resp = fixture
        .client
        .get(fixture.url("/api/packages/by-category/alumni/b.alumni"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["slug"], "b.alumni");
    assert_eq!(body["data"]["category"], "alumni");

    // Right slug, wrong category
    let resp = fixture
        .client
        .get(fixture.url("/api/packages/by-category/prime/b.alumni"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = fixture
        .client
        .get(fixture.url("/api/packages/by-category/sports/b.alumni"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_update_with_new_link_relinks_folder() {
    let drive = Arc::new(FakeDrive::new());
    drive.add_folder("first");
    drive.add_folder("second");
    let fixture = TestFixture::with_drive(drive.clone(), false).await;

    fixture
        .create(json!({
            "slug": "relink",
            "remoteFolderUrl": "https://drive.google.com/drive/folders/first"
        }))
        .await;

    let resp = fixture
        .client
        .put(fixture.url("/api/packages/relink"))
        .json(&json!({"remoteFolderUrl": "https://docs.google.com/document/d/second/edit"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["remoteFolderId"], "second");
    assert_eq!(
        body["data"]["remoteFolderUrl"],
        "https://drive.google.com/drive/folders/second"
    );
}

#[tokio::test]
async fn test_fetch_returns_content_and_records_version() {
    let drive = Arc::new(FakeDrive::new());
    drive.add_folder("folder-1");
    drive.add_file("folder-1", "m1", "story.aml", "text/plain", ARTICLE_TEXT.as_bytes());
    drive.add_file("folder-1", "d1", "article", GOOGLE_DOC_MIME, b"Preview text");
    drive.add_file("folder-1", "i1", "photo.jpg", "image/jpeg", &[1, 2, 3]);
    let fixture = TestFixture::with_drive(drive.clone(), false).await;
    let user = fixture
        .repo
        .upsert_user("jo@media.ucla.edu", "Jo Bruin")
        .await
        .unwrap();

    fixture
        .create(json!({
            "slug": "news.bruins",
            "remoteFolderUrl": "https://drive.google.com/drive/folders/folder-1"
        }))
        .await;

    let resp = fixture
        .client
        .post(fixture.url("/api/packages/news.bruins/fetch"))
        .header("x-oink-user", "Jo@media.ucla.edu")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let data = &body["data"];
    assert_eq!(data["slug"], "news.bruins");
    assert_eq!(data["article"], "Preview text");
    assert_eq!(data["dataMap"]["story.aml"]["headline"], "Bruins win");
    assert_eq!(
        data["dataMap"]["story.aml"]["content"],
        json!([{"type": "text", "value": "First paragraph."}])
    );
    assert_eq!(
        data["images"],
        json!([{"name": "photo.jpg", "url": "https://drive.google.com/uc?id=i1"}])
    );
    assert!(data["lastFetchedDate"].is_string());

    let resp = fixture
        .client
        .get(fixture.url("/api/packages/news.bruins/versions"))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    let versions = body["data"].as_array().unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0]["creatorId"], json!(user.id));
    assert_eq!(versions[0]["articleText"], "Preview text");
}

#[tokio::test]
async fn test_fetch_with_unknown_user_is_rejected() {
    let fixture = TestFixture::new().await;
    fixture.create(json!({"slug": "anon"})).await;

    let resp = fixture
        .client
        .post(fixture.url("/api/packages/anon/fetch"))
        .header("x-oink-user", "nobody@media.ucla.edu")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_fetch_missing_package_is_404() {
    let fixture = TestFixture::new().await;
    let resp = fixture.fetch("ghost").await;
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_fetch_without_drive_or_sample_fails() {
    let fixture = TestFixture::new().await;
    fixture.create(json!({"slug": "offline"})).await;

    let resp = fixture.fetch("offline").await;
    assert_eq!(resp.status(), 500);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(
        body["error"]["message"],
        "Unable to fetch package content from Drive and no local sample available."
    );

    // The fetch itself still completed
    let package = fixture.repo.get_package("offline").await.unwrap().unwrap();
    assert!(!package.processing);
    assert!(package.last_fetched_date.is_some());
}

#[tokio::test]
async fn test_fetch_without_drive_serves_local_sample() {
    let fixture = TestFixture::new().await;
    fixture.create(json!({"slug": "offline"})).await;

    let sample_dir = fixture.temp_dir.path().join("samples").join("offline");
    std::fs::create_dir_all(&sample_dir).unwrap();
    std::fs::write(sample_dir.join("article.aml"), ARTICLE_TEXT).unwrap();

    let resp = fixture.fetch("offline").await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["article"], ARTICLE_TEXT);
    assert_eq!(body["data"]["dataMap"]["article.aml"]["headline"], "Bruins win");
}

#[tokio::test]
async fn test_cached_blobs_are_served() {
    let drive = Arc::new(FakeDrive::new());
    drive.add_folder("folder-1");
    drive.add_file("folder-1", "i1", "photo.png", "image/png", &[137, 80, 78, 71]);
    drive.add_file("folder-1", "d1", "article", GOOGLE_DOC_MIME, ARTICLE_TEXT.as_bytes());
    let fixture = TestFixture::with_drive(drive, true).await;

    fixture
        .create(json!({
            "slug": "cached",
            "remoteFolderUrl": "https://drive.google.com/drive/folders/folder-1"
        }))
        .await;

    let resp = fixture.fetch("cached").await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let data = &body["data"];
    assert!(data["dataMap"]["cached-article.aml"].is_object());
    assert!(data["dataMap"]["_blob_ids"]["cached-article.aml"].is_string());

    let images = data["images"].as_array().unwrap();
    assert_eq!(images.len(), 1);
    assert_eq!(images[0]["contentType"], "image/png");
    let url = images[0]["url"].as_str().unwrap();
    assert!(url.starts_with("/files/"));

    // Blobs are public
    let resp = Client::new().get(fixture.url(url)).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "image/png");
    assert_eq!(resp.bytes().await.unwrap().to_vec(), vec![137u8, 80, 78, 71]);

    let resp = Client::new()
        .get(fixture.url("/files/does-not-exist"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_image_proxy() {
    let drive = Arc::new(FakeDrive::new());
    drive.add_folder("folder-1");
    drive.add_file("folder-1", "i1", "photo.jpg", "image/jpeg", &[9, 9, 9]);
    let fixture = TestFixture::with_drive(drive, false).await;

    fixture
        .create(json!({
            "slug": "pics",
            "remoteFolderUrl": "https://drive.google.com/drive/folders/folder-1"
        }))
        .await;
    fixture.fetch("pics").await;

    let resp = fixture
        .client
        .get(fixture.url("/api/packages/pics/image/i1"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "image/jpeg");
    assert_eq!(resp.bytes().await.unwrap().to_vec(), vec![9u8, 9, 9]);

    let resp = fixture
        .client
        .get(fixture.url("/api/packages/pics/image/unknown"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_google_login_without_client_is_unavailable() {
    let fixture = TestFixture::new().await;
    let resp = fixture
        .client
        .get(fixture.url("/google/login"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);

    let resp = fixture
        .client
        .get(fixture.url("/google/callback"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}
