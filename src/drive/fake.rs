//! In-memory Drive used by pipeline and provisioning tests.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use super::{DriveApi, DriveError, Download, Permission, RemoteFile};

static PARENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"'([^']*)' in parents").unwrap());
static MIME: Lazy<Regex> = Lazy::new(|| Regex::new(r"mimeType = '([^']*)'").unwrap());
static NAME_CONTAINS: Lazy<Regex> = Lazy::new(|| Regex::new(r"name contains '([^']*)'").unwrap());

#[derive(Debug, Clone)]
struct FakeFile {
    file: RemoteFile,
    parent: Option<String>,
    content: Vec<u8>,
}

#[derive(Default)]
struct State {
    files: Vec<FakeFile>,
    permissions: Vec<(String, Permission)>,
    created: Vec<String>,
    calls: usize,
    next_id: usize,
    fail_listing: bool,
    fail_writes: bool,
    failing_files: HashSet<String>,
    slow_files: HashSet<String>,
}

#[derive(Default)]
pub struct FakeDrive {
    state: Mutex<State>,
}

impl FakeDrive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_folder(&self, id: &str) {
        let mut state = self.state.lock().unwrap();
        state.files.push(FakeFile {
            file: RemoteFile {
                id: id.into(),
                name: id.into(),
                mime_type: super::FOLDER_MIME.into(),
                ..Default::default()
            },
            parent: None,
            content: Vec::new(),
        });
    }

    pub fn add_file(&self, parent: &str, id: &str, name: &str, mime_type: &str, content: &[u8]) {
        let mut state = self.state.lock().unwrap();
        state.files.push(FakeFile {
            file: RemoteFile {
                id: id.into(),
                name: name.into(),
                mime_type: mime_type.into(),
                web_view_link: Some(format!("https://drive.google.com/file/d/{id}/view")),
                web_content_link: Some(format!("https://drive.google.com/uc?id={id}")),
            },
            parent: Some(parent.into()),
            content: content.to_vec(),
        });
    }

    pub fn fail_listing(&self) {
        self.state.lock().unwrap().fail_listing = true;
    }

    pub fn fail_writes(&self) {
        self.state.lock().unwrap().fail_writes = true;
    }

    /// Export and download of this file fail.
    pub fn fail_file(&self, id: &str) {
        self.state.lock().unwrap().failing_files.insert(id.into());
    }

    /// Export and download of this file never complete.
    pub fn hang_file(&self, id: &str) {
        self.state.lock().unwrap().slow_files.insert(id.into());
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().calls
    }

    pub fn created_names(&self) -> Vec<String> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn parent_of(&self, id: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state
            .files
            .iter()
            .find(|f| f.file.id == id)
            .and_then(|f| f.parent.clone())
    }

    pub fn permissions_for(&self, id: &str) -> Vec<Permission> {
        let state = self.state.lock().unwrap();
        state
            .permissions
            .iter()
            .filter(|(file_id, _)| file_id == id)
            .map(|(_, p)| p.clone())
            .collect()
    }

    fn failure() -> DriveError {
        DriveError::Status {
            status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            body: "fake failure".into(),
        }
    }

    /// Content of a file, after the failure and hang switches are applied.
    async fn content(&self, file_id: &str) -> Result<FakeFile, DriveError> {
        let (file, hang) = {
            let mut state = self.state.lock().unwrap();
            state.calls += 1;
            if state.failing_files.contains(file_id) {
                return Err(Self::failure());
            }
            let file = state.files.iter().find(|f| f.file.id == file_id).cloned();
            (file, state.slow_files.contains(file_id))
        };
        if hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        file.ok_or_else(|| DriveError::Status {
            status: reqwest::StatusCode::NOT_FOUND,
            body: "File not found".into(),
        })
    }
}

#[async_trait]
impl DriveApi for FakeDrive {
    async fn find_files(&self, query: &str) -> Result<Vec<RemoteFile>, DriveError> {
        let mut state = self.state.lock().unwrap();
        state.calls += 1;
        if state.fail_listing {
            return Err(Self::failure());
        }
        let parent = PARENT.captures(query).map(|c| c[1].to_string());
        let mime = MIME.captures(query).map(|c| c[1].to_string());
        let name = NAME_CONTAINS.captures(query).map(|c| c[1].to_lowercase());
        Ok(state
            .files
            .iter()
            .filter(|f| parent.is_none() || f.parent == parent)
            .filter(|f| mime.as_ref().map_or(true, |m| &f.file.mime_type == m))
            .filter(|f| {
                name.as_ref()
                    .map_or(true, |n| f.file.name.to_lowercase().contains(n.as_str()))
            })
            .map(|f| f.file.clone())
            .collect())
    }

    async fn export_text(&self, file_id: &str) -> Result<String, DriveError> {
        let file = self.content(file_id).await?;
        Ok(String::from_utf8_lossy(&file.content).into_owned())
    }

    async fn download(&self, file_id: &str) -> Result<Download, DriveError> {
        let file = self.content(file_id).await?;
        Ok(Download {
            bytes: file.content,
            content_type: Some(file.file.mime_type),
        })
    }

    async fn create_file(
        &self,
        name: &str,
        mime_type: &str,
        parent_id: Option<&str>,
    ) -> Result<RemoteFile, DriveError> {
        let mut state = self.state.lock().unwrap();
        state.calls += 1;
        if state.fail_writes {
            return Err(Self::failure());
        }
        state.next_id += 1;
        let file = RemoteFile {
            id: format!("fake-{}", state.next_id),
            name: name.into(),
            mime_type: mime_type.into(),
            web_view_link: None,
            web_content_link: None,
        };
        state.files.push(FakeFile {
            file: file.clone(),
            parent: parent_id.map(str::to_string),
            content: Vec::new(),
        });
        state.created.push(name.to_string());
        Ok(file)
    }

    async fn create_permission(&self, file_id: &str, permission: &Permission) -> Result<(), DriveError> {
        let mut state = self.state.lock().unwrap();
        state.calls += 1;
        if state.fail_writes {
            return Err(Self::failure());
        }
        state.permissions.push((file_id.to_string(), permission.clone()));
        Ok(())
    }
}
