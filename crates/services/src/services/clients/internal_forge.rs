use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InternalForgeError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("forge returned {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct BranchInfo {
    pub revision: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitilesCommit {
    pub message: String,
}

/// The internal (mirror) forge contract: branch tip lookup and gitiles-style
/// commit-message lookup, both authenticated with LDAP credentials.
#[async_trait]
pub trait InternalForgeClient: Send + Sync {
    async fn branch_tip(&self, project: &str, branch: &str) -> Result<BranchInfo, InternalForgeError>;

    async fn commit_message(&self, project: &str, id: &str) -> Result<GitilesCommit, InternalForgeError>;
}

pub struct HttpInternalForgeClient {
    base_url: String,
    username: String,
    password: String,
    client: reqwest::Client,
}

impl HttpInternalForgeClient {
    pub fn new(base_url: String, username: String, password: String) -> Self {
        Self {
            base_url,
            username,
            password,
            client: reqwest::Client::new(),
        }
    }

    async fn get(&self, url: String) -> Result<reqwest::Response, InternalForgeError> {
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;

        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            Err(InternalForgeError::UnexpectedStatus { status, body })
        }
    }
}

#[async_trait]
impl InternalForgeClient for HttpInternalForgeClient {
    async fn branch_tip(&self, project: &str, branch: &str) -> Result<BranchInfo, InternalForgeError> {
        let url = format!("{}/projects/{project}/branches/{branch}", self.base_url);
        let info = self.get(url).await?.json().await?;
        Ok(info)
    }

    async fn commit_message(&self, project: &str, id: &str) -> Result<GitilesCommit, InternalForgeError> {
        let url = format!("{}/projects/{project}/commits/{id}", self.base_url);
        let info = self.get(url).await?.json().await?;
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn branch_tip_uses_basic_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects/plat%2Fframework/branches/master"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "revision": "cafef00d",
            })))
            .mount(&server)
            .await;

        let client = HttpInternalForgeClient::new(
            server.uri(),
            "svc-ldap".into(),
            "svc-password".into(),
        );
        let info = client
            .branch_tip("plat%2Fframework", "master")
            .await
            .expect("branch_tip");

        assert_eq!(info.revision, "cafef00d");
    }

    #[tokio::test]
    async fn branch_tip_surfaces_unexpected_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects/plat%2Fframework/branches/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such branch"))
            .mount(&server)
            .await;

        let client = HttpInternalForgeClient::new(
            server.uri(),
            "svc-ldap".into(),
            "svc-password".into(),
        );
        let err = client
            .branch_tip("plat%2Fframework", "missing")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            InternalForgeError::UnexpectedStatus { status: 404, .. }
        ));
    }

    #[tokio::test]
    async fn commit_message_returns_gitiles_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects/plat%2Fframework/commits/abc123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "message": "Merge \"fix overflow\"",
            })))
            .mount(&server)
            .await;

        let client = HttpInternalForgeClient::new(
            server.uri(),
            "svc-ldap".into(),
            "svc-password".into(),
        );
        let commit = client
            .commit_message("plat%2Fframework", "abc123")
            .await
            .expect("commit_message");

        assert_eq!(commit.message, "Merge \"fix overflow\"");
    }
}
