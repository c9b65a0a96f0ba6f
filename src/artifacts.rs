//! Results artifact publishing: upload to the artifact store, keep a local copy.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{multipart, Client};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{Result, SessionError};

/// Domain used when neither a remote nor a local reservation names one.
pub const DEFAULT_DOMAIN: &str = "Global";

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn authenticate(&self, token: &str, domain: &str) -> Result<()>;

    /// Attach `content` as `file_name` to the reservation `scope_id`.
    async fn upload(&self, scope_id: &str, file_name: &str, content: Bytes) -> Result<()>;
}

/// Remote/delegated reservation domain first, then the local one, then
/// [`DEFAULT_DOMAIN`].
pub fn resolve_domain(remote: Option<&str>, local: Option<&str>) -> String {
    [remote, local]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|d| !d.is_empty())
        .unwrap_or(DEFAULT_DOMAIN)
        .to_string()
}

/// Replace every run of whitespace with a single `_`.
pub fn normalize_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_run = false;
    for c in s.chars() {
        if c.is_whitespace() {
            if !in_run {
                out.push('_');
            }
            in_run = true;
        } else {
            out.push(c);
            in_run = false;
        }
    }
    out
}

/// `<environment>_<test id>.pdf`, whitespace-normalized.
pub fn artifact_file_name(environment: &str, test_id: &str) -> String {
    format!(
        "{}_{}.pdf",
        normalize_whitespace(environment),
        normalize_whitespace(test_id)
    )
}

/// Write the local copy `<dir>/<reservation id>.pdf`.
pub async fn persist_local(dir: &Path, reservation_id: &str, content: &[u8]) -> Result<PathBuf> {
    let path = dir.join(format!("{}.pdf", reservation_id));
    let persist_err = |source| SessionError::Persist {
        path: path.clone(),
        source,
    };
    tokio::fs::create_dir_all(dir).await.map_err(persist_err)?;
    tokio::fs::write(&path, content).await.map_err(persist_err)?;
    debug!(path = %path.display(), bytes = content.len(), "results copy persisted");
    Ok(path)
}

// ---------------------------------------------------------------------------
// REST store
// ---------------------------------------------------------------------------

const AUTH_LOGIN: &str = "/api/v1/auth/login";

pub struct RestArtifactStore {
    client: Client,
    server_address: String,
    access_token: RwLock<Option<String>>,
}

impl RestArtifactStore {
    pub fn new(server_address: &str) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| SessionError::remote("artifact_store", e))?;
        Ok(Self {
            client,
            server_address: server_address.trim_end_matches('/').to_string(),
            access_token: RwLock::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.server_address, path)
    }
}

#[async_trait]
impl ArtifactStore for RestArtifactStore {
    async fn authenticate(&self, token: &str, domain: &str) -> Result<()> {
        const OP: &str = "artifact_login";
        let resp = self
            .client
            .post(self.url(AUTH_LOGIN))
            .json(&json!({ "token": token, "domain": domain }))
            .send()
            .await
            .map_err(|e| SessionError::remote(OP, e))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SessionError::remote(
                OP,
                format!("HTTP {}: {}", status.as_u16(), body.trim()),
            ));
        }
        let data: Value = resp
            .json()
            .await
            .map_err(|e| SessionError::remote(OP, format!("invalid response body: {}", e)))?;
        let access = data
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| SessionError::remote(OP, "response has no access_token"))?;

        *self.access_token.write().await = Some(access.to_string());
        info!(domain, "artifact store session opened");
        Ok(())
    }

    async fn upload(&self, scope_id: &str, file_name: &str, content: Bytes) -> Result<()> {
        const OP: &str = "artifact_upload";
        let access = self
            .access_token
            .read()
            .await
            .clone()
            .ok_or_else(|| SessionError::remote(OP, "not authenticated"))?;

        let size = content.len();
        let form = multipart::Form::new()
            .text("overwrite", "true")
            .part(
                "file",
                multipart::Part::stream(content).file_name(file_name.to_string()),
            );
        let resp = self
            .client
            .post(self.url(&format!("/api/v1/reservations/{}/attachments", scope_id)))
            .bearer_auth(access)
            .multipart(form)
            .send()
            .await
            .map_err(|e| SessionError::remote(OP, e))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SessionError::remote(
                OP,
                format!("HTTP {}: {}", status.as_u16(), body.trim()),
            ));
        }
        info!(scope_id, file_name, bytes = size, "artifact uploaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Multipart, Path as UrlPath};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::{Arc, Mutex};

    #[test]
    fn domain_preference_order() {
        assert_eq!(resolve_domain(Some("Partner"), Some("Lab")), "Partner");
        assert_eq!(resolve_domain(None, Some("Lab")), "Lab");
        assert_eq!(resolve_domain(Some("  "), Some("Lab")), "Lab");
        assert_eq!(resolve_domain(None, None), "Global");
    }

    #[test]
    fn file_name_normalizes_whitespace_runs() {
        assert_eq!(
            artifact_file_name("Nightly  Soak\tEnv", "TEST 42 run"),
            "Nightly_Soak_Env_TEST_42_run.pdf"
        );
        assert_eq!(normalize_whitespace(" lead"), "_lead");
        assert_eq!(normalize_whitespace("plain"), "plain");
    }

    #[tokio::test]
    async fn persist_local_creates_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let target = dir.path().join("reports");
        let path = persist_local(&target, "res-9", b"%PDF-1.4").await.unwrap();
        assert_eq!(path, target.join("res-9.pdf"));
        assert_eq!(std::fs::read(path).unwrap(), b"%PDF-1.4");
    }

    #[tokio::test]
    async fn persist_local_reports_path_on_failure() {
        let dir = tempfile::TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        let err = persist_local(&blocker, "res-9", b"data").await.unwrap_err();
        assert!(matches!(err, SessionError::Persist { .. }));
    }

    #[tokio::test]
    async fn login_then_upload() {
        let uploads: Arc<Mutex<Vec<(String, String, String)>>> = Arc::default();
        let seen = uploads.clone();

        let router = Router::new()
            .route(
                AUTH_LOGIN,
                post(|Json(body): Json<Value>| async move {
                    assert_eq!(body["domain"], "Lab");
                    Json(json!({ "access_token": "abc" }))
                }),
            )
            .route(
                "/api/v1/reservations/{id}/attachments",
                post(
                    move |UrlPath(id): UrlPath<String>, headers: HeaderMap, mut form: Multipart| {
                        let seen = seen.clone();
                        async move {
                            let auth = headers["authorization"].to_str().unwrap().to_string();
                            while let Some(field) = form.next_field().await.unwrap() {
                                if field.name() == Some("file") {
                                    let name = field.file_name().unwrap().to_string();
                                    seen.lock().unwrap().push((id.clone(), name, auth.clone()));
                                }
                            }
                            StatusCode::OK
                        }
                    },
                ),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });

        let store = RestArtifactStore::new(&format!("http://{}", addr)).unwrap();
        store.authenticate("admin-token", "Lab").await.unwrap();
        store
            .upload("res-1", "env_TEST.pdf", Bytes::from_static(b"%PDF"))
            .await
            .unwrap();

        let uploads = uploads.lock().unwrap().clone();
        assert_eq!(
            uploads,
            vec![(
                "res-1".to_string(),
                "env_TEST.pdf".to_string(),
                "Bearer abc".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn upload_without_login_is_rejected() {
        let store = RestArtifactStore::new("http://127.0.0.1:9").unwrap();
        let err = store
            .upload("res-1", "x.pdf", Bytes::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not authenticated"));
    }
}
