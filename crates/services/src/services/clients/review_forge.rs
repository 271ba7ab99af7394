use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReviewForgeError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unauthorized")]
    Unauthorized,
    #[error("not found")]
    NotFound,
    #[error("rate limited")]
    RateLimited,
    #[error("forge returned {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestDetail {
    pub state: String,
    pub merged: bool,
    pub mergeable_state: Option<String>,
    pub merge_commit_sha: Option<String>,
    pub merged_by: Option<MergedBy>,
    pub merged_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MergedBy {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitDetail {
    pub commit: CommitMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitMessage {
    pub message: String,
}

/// Rich-enough summary a handler derives from a `PullRequestDetail` poll.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewInfo {
    pub state: String,
    pub merged: bool,
    pub merge_commit_id: Option<String>,
}

impl From<&PullRequestDetail> for ReviewInfo {
    fn from(detail: &PullRequestDetail) -> Self {
        ReviewInfo {
            state: detail.state.clone(),
            merged: detail.merged,
            merge_commit_id: detail.merge_commit_sha.clone(),
        }
    }
}

/// The public forge contract the engine depends on: pull-request polling and
/// commit-message lookup (used to resolve mirror-sync expected subjects).
#[async_trait]
pub trait ReviewForgeClient: Send + Sync {
    async fn pull_request(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
    ) -> Result<PullRequestDetail, ReviewForgeError>;

    async fn commit_detail(
        &self,
        owner: &str,
        repo: &str,
        id: &str,
    ) -> Result<CommitDetail, ReviewForgeError>;
}

pub struct HttpReviewForgeClient {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl HttpReviewForgeClient {
    pub fn new(base_url: String, token: String) -> Self {
        Self {
            base_url,
            token,
            client: reqwest::Client::new(),
        }
    }

    async fn send(&self, url: String) -> Result<reqwest::Response, ReviewForgeError> {
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        match response.status().as_u16() {
            200..=299 => Ok(response),
            401 => Err(ReviewForgeError::Unauthorized),
            404 => Err(ReviewForgeError::NotFound),
            403 if response
                .headers()
                .get("x-ratelimit-remaining")
                .is_some() =>
            {
                Err(ReviewForgeError::RateLimited)
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(ReviewForgeError::UnexpectedStatus { status, body })
            }
        }
    }
}

#[async_trait]
impl ReviewForgeClient for HttpReviewForgeClient {
    async fn pull_request(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
    ) -> Result<PullRequestDetail, ReviewForgeError> {
        let url = format!("{}/repos/{owner}/{repo}/pulls/{number}", self.base_url);
        let detail = self.send(url).await?.json().await?;
        Ok(detail)
    }

    async fn commit_detail(
        &self,
        owner: &str,
        repo: &str,
        id: &str,
    ) -> Result<CommitDetail, ReviewForgeError> {
        let url = format!("{}/repos/{owner}/{repo}/commits/{id}", self.base_url);
        let detail = self.send(url).await?.json().await?;
        Ok(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn pull_request_parses_merged_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widget/pulls/7"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "state": "closed",
                "merged": true,
                "mergeable_state": null,
                "merge_commit_sha": "abc123",
                "merged_by": {"login": "reviewer"},
                "merged_at": "2024-01-01T00:00:00Z",
            })))
            .mount(&server)
            .await;

        let client = HttpReviewForgeClient::new(server.uri(), "test-token".into());
        let pr = client.pull_request("acme", "widget", 7).await.expect("pull_request");

        assert!(pr.merged);
        assert_eq!(pr.merge_commit_sha.as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn pull_request_maps_401_to_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widget/pulls/7"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = HttpReviewForgeClient::new(server.uri(), "test-token".into());
        let err = client.pull_request("acme", "widget", 7).await.unwrap_err();

        assert!(matches!(err, ReviewForgeError::Unauthorized));
    }

    #[tokio::test]
    async fn pull_request_maps_404_to_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widget/pulls/9"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = HttpReviewForgeClient::new(server.uri(), "test-token".into());
        let err = client.pull_request("acme", "widget", 9).await.unwrap_err();

        assert!(matches!(err, ReviewForgeError::NotFound));
    }

    #[tokio::test]
    async fn commit_detail_returns_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widget/commits/deadbeef"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "commit": {"message": "fix: widget overflow"},
            })))
            .mount(&server)
            .await;

        let client = HttpReviewForgeClient::new(server.uri(), "test-token".into());
        let detail = client
            .commit_detail("acme", "widget", "deadbeef")
            .await
            .expect("commit_detail");

        assert_eq!(detail.commit.message, "fix: widget overflow");
    }
}
