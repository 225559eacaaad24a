//! Object store gateway.
//!
//! Binary assets (uploaded documents, card images, covers) live in an
//! external bucket behind an HTTP API; records keep only the public URL.
//! Keys are namespaced by owner id so users cannot collide, and the
//! URL <-> key translation is a pure string operation against the
//! configured public bucket host.

use std::time::Duration;

use axum::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::config::Config;
use crate::error::AppError;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores bytes under `key`, returns the public URL.
    async fn upload(&self, key: &str, bytes: Vec<u8>, content_type: &str)
        -> Result<String, AppError>;

    async fn fetch(&self, key: &str) -> Result<Vec<u8>, AppError>;

    /// Returns whether the object existed.
    async fn delete(&self, key: &str) -> Result<bool, AppError>;

    /// Time-limited, credential-free read link.
    async fn presign(&self, key: &str, ttl_secs: u64) -> Result<String, AppError>;

    fn public_url(&self, key: &str) -> String;

    /// Inverse of [`public_url`](Self::public_url); `None` for URLs outside
    /// the configured bucket host.
    fn key_for_url(&self, url: &str) -> Option<String>;

    /// Decodes a base64 payload and uploads it.
    async fn upload_encoded(
        &self,
        key: &str,
        base64_data: &str,
        content_type: &str,
    ) -> Result<String, AppError> {
        let bytes = STANDARD
            .decode(base64_data.trim())
            .map_err(|_| AppError::Validation("Invalid base64 image data".to_string()))?;
        self.upload(key, bytes, content_type).await
    }
}

/// `users/<user_id>/<filename>`, with the filename stripped of path
/// components and shell-hostile characters.
pub fn object_key(user_id: &str, filename: &str) -> String {
    format!("users/{user_id}/{}", sanitize_filename(filename))
}

pub fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim_matches('_').is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

pub fn content_type_for(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

/// HTTP client for the bucket API: `PUT`/`GET`/`DELETE`
/// `{endpoint}/{bucket}/{key}`, plus a presign endpoint.
pub struct HttpObjectStore {
    http: Client,
    endpoint: String,
    bucket: String,
    public_host: String,
    api_key: String,
}

#[derive(Deserialize)]
struct PresignResponse {
    url: String,
}

impl HttpObjectStore {
    pub fn new(config: &Config, timeout: Duration) -> Self {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            http,
            endpoint: config.object_store_endpoint.trim_end_matches('/').to_string(),
            bucket: config.object_store_bucket.clone(),
            public_host: config.object_store_public_host.clone(),
            api_key: config.object_store_api_key.clone(),
        }
    }

    fn object_endpoint(&self, key: &str) -> String {
        format!("{}/{}/{key}", self.endpoint, self.bucket)
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, AppError> {
        let response = self
            .http
            .put(self.object_endpoint(key))
            .header("x-api-key", &self.api_key)
            .header("content-type", content_type)
            .body(bytes)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AppError::Upstream(format!(
                "object store upload returned {}",
                response.status()
            )));
        }
        Ok(self.public_url(key))
    }

    async fn fetch(&self, key: &str) -> Result<Vec<u8>, AppError> {
        let response = self
            .http
            .get(self.object_endpoint(key))
            .header("x-api-key", &self.api_key)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::NotFound("File"));
        }
        if !response.status().is_success() {
            return Err(AppError::Upstream(format!(
                "object store fetch returned {}",
                response.status()
            )));
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn delete(&self, key: &str) -> Result<bool, AppError> {
        let response = self
            .http
            .delete(self.object_endpoint(key))
            .header("x-api-key", &self.api_key)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !response.status().is_success() {
            return Err(AppError::Upstream(format!(
                "object store delete returned {}",
                response.status()
            )));
        }
        Ok(true)
    }

    async fn presign(&self, key: &str, ttl_secs: u64) -> Result<String, AppError> {
        let response = self
            .http
            .post(format!("{}/presign", self.object_endpoint(key)))
            .header("x-api-key", &self.api_key)
            .json(&json!({ "expires_in": ttl_secs }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AppError::Upstream(format!(
                "object store presign returned {}",
                response.status()
            )));
        }
        let presigned: PresignResponse = response.json().await?;
        Ok(presigned.url)
    }

    fn public_url(&self, key: &str) -> String {
        format!("https://{}.{}/{key}", self.bucket, self.public_host)
    }

    fn key_for_url(&self, url: &str) -> Option<String> {
        let prefix = format!("https://{}.{}/", self.bucket, self.public_host);
        url.strip_prefix(&prefix).map(str::to_string)
    }
}

/// In-memory store for tests.
#[cfg(test)]
pub struct MemoryObjectStore {
    bucket: String,
    public_host: String,
    data: std::sync::Mutex<std::collections::HashMap<String, Vec<u8>>>,
}

#[cfg(test)]
impl MemoryObjectStore {
    pub fn new(bucket: &str, public_host: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            public_host: public_host.to_string(),
            data: std::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.lock().unwrap().contains_key(key)
    }
}

#[cfg(test)]
#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<String, AppError> {
        self.data.lock().unwrap().insert(key.to_string(), bytes);
        Ok(self.public_url(key))
    }

    async fn fetch(&self, key: &str) -> Result<Vec<u8>, AppError> {
        self.data
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or(AppError::NotFound("File"))
    }

    async fn delete(&self, key: &str) -> Result<bool, AppError> {
        Ok(self.data.lock().unwrap().remove(key).is_some())
    }

    async fn presign(&self, key: &str, ttl_secs: u64) -> Result<String, AppError> {
        Ok(format!("{}?expires={ttl_secs}", self.public_url(key)))
    }

    fn public_url(&self, key: &str) -> String {
        format!("https://{}.{}/{key}", self.bucket, self.public_host)
    }

    fn key_for_url(&self, url: &str) -> Option<String> {
        let prefix = format!("https://{}.{}/", self.bucket, self.public_host);
        url.strip_prefix(&prefix).map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_namespacing() {
        assert_eq!(
            object_key("user-1", "lecture 3.pdf"),
            "users/user-1/lecture_3.pdf"
        );
    }

    #[test]
    fn test_sanitize_strips_path_components() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\notes\\week1.docx"), "week1.docx");
        assert_eq!(sanitize_filename("???"), "file");
    }

    #[test]
    fn test_content_type_inference() {
        assert_eq!(content_type_for("notes.PDF"), "application/pdf");
        assert_eq!(content_type_for("scan.jpeg"), "image/jpeg");
        assert_eq!(content_type_for("mystery.bin"), "application/octet-stream");
        assert_eq!(content_type_for("noextension"), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_memory_store_url_roundtrip() {
        let store = MemoryObjectStore::new("test-bucket", "objects.test");
        let url = store
            .upload("users/u1/a.png", vec![1, 2, 3], "image/png")
            .await
            .unwrap();
        assert_eq!(url, "https://test-bucket.objects.test/users/u1/a.png");
        assert_eq!(store.key_for_url(&url).unwrap(), "users/u1/a.png");
        assert!(store.key_for_url("https://elsewhere.com/x.png").is_none());
        assert_eq!(store.fetch("users/u1/a.png").await.unwrap(), vec![1, 2, 3]);
        assert!(store.delete("users/u1/a.png").await.unwrap());
        assert!(!store.delete("users/u1/a.png").await.unwrap());
    }

    #[tokio::test]
    async fn test_upload_encoded_rejects_bad_base64() {
        let store = MemoryObjectStore::new("test-bucket", "objects.test");
        let err = store
            .upload_encoded("users/u1/a.png", "not base64!!!", "image/png")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let encoded = STANDARD.encode([9u8, 9, 9]);
        store
            .upload_encoded("users/u1/b.png", &encoded, "image/png")
            .await
            .unwrap();
        assert_eq!(store.fetch("users/u1/b.png").await.unwrap(), vec![9, 9, 9]);
    }
}
