//! Google Drive v3 implementation of [`RemoteStore`].

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::auth::GoogleAuth;
use crate::store::{RemoteFile, RemoteStore, SQLITE_MIME_TYPE};
use parabot_core::error::ParabotError;

pub const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
pub const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
const FILE_FIELDS: &str = "id,name,parents,mimeType,modifiedTime,webViewLink";
const LIST_FIELDS: &str = "nextPageToken,files(id,name,parents,mimeType,modifiedTime,webViewLink)";
const MAX_FOLDER_DEPTH: usize = 32;
/// Whole-request bound, body transfer included.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<RemoteFile>,
    next_page_token: Option<String>,
}

pub struct DriveStore {
    auth: Arc<GoogleAuth>,
    http: reqwest::Client,
    api_base: String,
    upload_base: String,
}

/// Quote a value for use inside a `'...'` literal of a Drive query.
pub fn escape_query_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

pub fn exact_name_query(name: &str) -> String {
    format!("name='{}' and trashed=false", escape_query_value(name))
}

pub fn name_contains_query(term: &str) -> String {
    format!("name contains '{}' and trashed=false", escape_query_value(term))
}

/// Body of a `multipart/related` upload: JSON metadata part, then the media part.
pub fn multipart_related_body(
    boundary: &str,
    metadata: &serde_json::Value,
    mime_type: &str,
    content: &[u8],
) -> Vec<u8> {
    let mut body = Vec::with_capacity(content.len() + 256);
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(metadata.to_string().as_bytes());
    body.extend_from_slice(format!("\r\n--{boundary}\r\n").as_bytes());
    body.extend_from_slice(format!("Content-Type: {mime_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

async fn check_response(
    resp: reqwest::Response,
    what: &str,
) -> Result<reqwest::Response, ParabotError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(ParabotError::RemoteNotFound(what.to_string()));
    }
    Err(ParabotError::Remote {
        status: status.as_u16(),
        message: format!(
            "{what}: {}",
            body.chars().take(300).collect::<String>()
        ),
    })
}

fn build_http(timeout: Duration) -> Result<reqwest::Client, ParabotError> {
    Ok(reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(15))
        .timeout(timeout)
        .build()?)
}

impl DriveStore {
    pub fn new(auth: Arc<GoogleAuth>) -> Result<Self, ParabotError> {
        Ok(DriveStore {
            auth,
            http: build_http(REQUEST_TIMEOUT)?,
            api_base: DRIVE_API_BASE.into(),
            upload_base: DRIVE_UPLOAD_BASE.into(),
        })
    }

    /// Run a raw Drive query, following pagination.
    pub async fn search(
        &self,
        query: &str,
        order_by: Option<&str>,
    ) -> Result<Vec<RemoteFile>, ParabotError> {
        let url = format!("{}/files", self.api_base);
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut params: Vec<(&str, &str)> = vec![
                ("q", query),
                ("fields", LIST_FIELDS),
                ("spaces", "drive"),
            ];
            if let Some(order) = order_by {
                params.push(("orderBy", order));
            }
            if let Some(token) = page_token.as_deref() {
                params.push(("pageToken", token));
            }
            let resp = self
                .http
                .get(&url)
                .bearer_auth(self.auth.access_token().await?)
                .query(&params)
                .send()
                .await?;
            let page: FileList = check_response(resp, "files.list").await?.json().await?;
            files.extend(page.files);
            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }
        debug!("Drive query {query:?} returned {} file(s)", files.len());
        Ok(files)
    }

    /// Human-readable folder path for a parent id, walking up to the drive root.
    pub async fn folder_path(&self, parent_id: Option<&str>) -> String {
        let Some(mut current) = parent_id.map(str::to_string) else {
            return "Drive root".into();
        };
        let mut names = Vec::new();
        for _ in 0..MAX_FOLDER_DEPTH {
            let folder = match self.get_metadata(&current).await {
                Ok(folder) => folder,
                Err(_) => return "(path unavailable)".into(),
            };
            names.push(folder.name);
            match folder.parents.into_iter().next() {
                Some(next) => current = next,
                None => break,
            }
        }
        if names.is_empty() {
            return "Drive root".into();
        }
        names.reverse();
        names.join(" / ")
    }
}

#[async_trait]
impl RemoteStore for DriveStore {
    async fn get_metadata(&self, id: &str) -> Result<RemoteFile, ParabotError> {
        let resp = self
            .http
            .get(format!("{}/files/{id}", self.api_base))
            .bearer_auth(self.auth.access_token().await?)
            .query(&[("fields", FILE_FIELDS)])
            .send()
            .await?;
        Ok(check_response(resp, &format!("file {id}"))
            .await?
            .json()
            .await?)
    }

    async fn find_by_name(&self, name: &str) -> Result<Vec<RemoteFile>, ParabotError> {
        self.search(&exact_name_query(name), None).await
    }

    async fn download(
        &self,
        id: &str,
        dest: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, ParabotError> {
        let resp = self
            .http
            .get(format!("{}/files/{id}", self.api_base))
            .bearer_auth(self.auth.access_token().await?)
            .query(&[("alt", "media")])
            .send()
            .await?;
        let mut resp = check_response(resp, &format!("file {id}")).await?;
        let mut total = 0u64;
        while let Some(chunk) = resp.chunk().await? {
            dest.write_all(&chunk).await?;
            total += chunk.len() as u64;
        }
        dest.flush().await?;
        Ok(total)
    }

    async fn create(&self, name: &str, content: Vec<u8>) -> Result<RemoteFile, ParabotError> {
        let boundary = format!("parabot-{}", uuid::Uuid::new_v4().simple());
        let metadata = serde_json::json!({ "name": name, "mimeType": SQLITE_MIME_TYPE });
        let body = multipart_related_body(&boundary, &metadata, SQLITE_MIME_TYPE, &content);
        let resp = self
            .http
            .post(format!("{}/files", self.upload_base))
            .bearer_auth(self.auth.access_token().await?)
            .query(&[("uploadType", "multipart"), ("fields", FILE_FIELDS)])
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .body(body)
            .send()
            .await?;
        Ok(check_response(resp, "files.create").await?.json().await?)
    }

    async fn update(&self, id: &str, content: Vec<u8>) -> Result<(), ParabotError> {
        let resp = self
            .http
            .patch(format!("{}/files/{id}", self.upload_base))
            .bearer_auth(self.auth.access_token().await?)
            .query(&[("uploadType", "media"), ("fields", "id")])
            .header(reqwest::header::CONTENT_TYPE, SQLITE_MIME_TYPE)
            .body(content)
            .send()
            .await?;
        check_response(resp, &format!("file {id}")).await?;
        Ok(())
    }
}
