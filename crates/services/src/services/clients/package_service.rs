use async_trait::async_trait;
use base64::Engine;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Public key CRP uses to encrypt the LDAP password on login, carried as
/// ambient configuration (`original_source/app/services/crp_service.py`).
const CRP_PUBLIC_KEY_PEM: &str = "-----BEGIN PUBLIC KEY-----
MIGfMA0GCSqGSIb3DQEBAQUAA4GNADCBiQKBgQCkA9WqirWQII3D8/M9UG8X8ybQ
Ou+cPSNTgR9b4HenJ7A5zSfkXZnetb5q6MmKTJLGCl9MSsHveQPHmLGDG+xw2MlB
w3Yefd/jJ1Cg8pP69wlHRX+wiyh5p8KY55ehFNsQLm3kDGXgVJdtrZn/MiBOlCtE
fe9YvvT0lqy2BtBpaQIDAQAB
-----END PUBLIC KEY-----";

pub const DEFAULT_CRP_BASE_URL: &str = "https://crp.uniontech.com/api";
pub const DEFAULT_ARCHES: &str = "amd64;arm64;loong64;sw64;mips64el";

#[derive(Debug, Error)]
pub enum PackageServiceError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("password encryption failed: {0}")]
    Encryption(String),
    #[error("login did not return a token")]
    NoToken,
    #[error("package service returned {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicRelease {
    pub id: i64,
    pub project_id: i64,
    pub project_name: String,
    pub branch: String,
    pub tag: String,
    pub commit: String,
    pub build_id: i64,
    pub build_state: String,
    pub arches: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectSearchResult {
    #[serde(rename = "ID")]
    pub id: i64,
    #[serde(rename = "Name")]
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct SubmitBuildRequest {
    pub topic_id: i64,
    pub project_id: i64,
    pub project_name: String,
    pub branch: String,
    pub branch_id: i64,
    pub commit: String,
    pub tag: String,
    pub arches: String,
    pub changelog: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitBuildResult {
    pub build_id: String,
    pub url: String,
}

/// The CRP package-build service contract.
#[async_trait]
pub trait PackageServiceClient: Send + Sync {
    async fn login(&self, username: &str, password: &str) -> Result<String, PackageServiceError>;

    async fn current_user(&self, token: &str) -> Result<String, PackageServiceError>;

    async fn list_topic_releases(
        &self,
        token: &str,
        topic_id: i64,
    ) -> Result<Vec<TopicRelease>, PackageServiceError>;

    async fn search_projects(
        &self,
        token: &str,
        name: &str,
        branch_id: i64,
    ) -> Result<Vec<ProjectSearchResult>, PackageServiceError>;

    async fn submit_build(
        &self,
        token: &str,
        request: &SubmitBuildRequest,
    ) -> Result<SubmitBuildResult, PackageServiceError>;

    async fn delete_release(&self, token: &str, release_id: i64) -> Result<bool, PackageServiceError>;

    async fn retry_build(&self, token: &str, release_id: i64) -> Result<bool, PackageServiceError>;

    /// Releases under `topic_id` whose project name starts with `alias` and
    /// matches `branch` exactly — the fuzzy match the original uses because a
    /// project's CRP name may carry a distro-release suffix (`dtk6log-v25`).
    async fn find_fuzzy_release(
        &self,
        token: &str,
        topic_id: i64,
        alias: &str,
        branch: &str,
    ) -> Result<Option<TopicRelease>, PackageServiceError> {
        let releases = self.list_topic_releases(token, topic_id).await?;
        Ok(releases
            .into_iter()
            .find(|r| r.project_name.starts_with(alias) && r.branch == branch))
    }
}

pub struct HttpPackageServiceClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpPackageServiceClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    /// RSA-encrypt then base64-encode the LDAP password, as the package
    /// service requires on login.
    pub fn encrypt_password(password: &str) -> Result<String, PackageServiceError> {
        let public_key = RsaPublicKey::from_pkcs1_pem(CRP_PUBLIC_KEY_PEM)
            .map_err(|e| PackageServiceError::Encryption(e.to_string()))?;

        let mut rng = rand::thread_rng();
        let encrypted = public_key
            .encrypt(&mut rng, Pkcs1v15Encrypt, password.as_bytes())
            .map_err(|e| PackageServiceError::Encryption(e.to_string()))?;

        Ok(base64::engine::general_purpose::STANDARD.encode(encrypted))
    }
}

#[async_trait]
impl PackageServiceClient for HttpPackageServiceClient {
    async fn login(&self, username: &str, password: &str) -> Result<String, PackageServiceError> {
        let encrypted = Self::encrypt_password(password)?;
        let url = format!("{}/login", self.base_url);

        #[derive(Serialize)]
        struct LoginRequest<'a> {
            #[serde(rename = "userName")]
            user_name: &'a str,
            password: String,
        }
        #[derive(Deserialize)]
        struct LoginResponse {
            #[serde(rename = "Token")]
            token: Option<String>,
        }

        let response = self
            .client
            .post(&url)
            .json(&LoginRequest {
                user_name: username,
                password: encrypted,
            })
            .send()
            .await?;

        let response: LoginResponse = error_checked(response).await?.json().await?;
        response.token.ok_or(PackageServiceError::NoToken)
    }

    async fn current_user(&self, token: &str) -> Result<String, PackageServiceError> {
        let url = format!("{}/user", self.base_url);

        #[derive(Deserialize)]
        struct UserResponse {
            #[serde(rename = "Name")]
            name: String,
        }

        let response = self.client.get(&url).bearer_auth(token).send().await?;
        let response: UserResponse = error_checked(response).await?.json().await?;
        Ok(response.name)
    }

    async fn list_topic_releases(
        &self,
        token: &str,
        topic_id: i64,
    ) -> Result<Vec<TopicRelease>, PackageServiceError> {
        #[derive(Deserialize)]
        struct RawRelease {
            #[serde(rename = "ID")]
            id: i64,
            #[serde(rename = "ProjectID")]
            project_id: i64,
            #[serde(rename = "ProjectName")]
            project_name: String,
            #[serde(rename = "Branch")]
            branch: String,
            #[serde(rename = "Tag")]
            tag: String,
            #[serde(rename = "Commit")]
            commit: String,
            #[serde(rename = "BuildID")]
            build_id: i64,
            #[serde(rename = "BuildState")]
            build_state: Option<RawBuildState>,
            #[serde(rename = "Arches")]
            arches: String,
        }
        #[derive(Deserialize)]
        struct RawBuildState {
            state: Option<String>,
        }

        let url = format!("{}/topics/{topic_id}/releases", self.base_url);
        let response = self.client.get(&url).bearer_auth(token).send().await?;
        let raw: Vec<RawRelease> = error_checked(response).await?.json().await?;

        Ok(raw
            .into_iter()
            .map(|r| TopicRelease {
                id: r.id,
                project_id: r.project_id,
                project_name: r.project_name,
                branch: r.branch,
                tag: r.tag,
                commit: r.commit,
                build_id: r.build_id,
                build_state: r
                    .build_state
                    .and_then(|s| s.state)
                    .unwrap_or_else(|| "UNKNOWN".into()),
                arches: r.arches,
            })
            .collect())
    }

    async fn search_projects(
        &self,
        token: &str,
        name: &str,
        branch_id: i64,
    ) -> Result<Vec<ProjectSearchResult>, PackageServiceError> {
        #[derive(Serialize)]
        struct SearchRequest<'a> {
            page: i64,
            #[serde(rename = "perPage")]
            per_page: i64,
            #[serde(rename = "projectGroupID")]
            project_group_id: i64,
            #[serde(rename = "newCommit")]
            new_commit: bool,
            archived: bool,
            #[serde(rename = "branchID")]
            branch_id: i64,
            name: &'a str,
        }
        #[derive(Deserialize)]
        struct SearchResponse {
            #[serde(rename = "Projects")]
            projects: Option<Vec<ProjectSearchResult>>,
        }

        let url = format!("{}/project", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&SearchRequest {
                page: 0,
                per_page: 0,
                project_group_id: 0,
                new_commit: false,
                archived: false,
                branch_id,
                name,
            })
            .send()
            .await?;

        let response: SearchResponse = error_checked(response).await?.json().await?;
        Ok(response.projects.unwrap_or_default())
    }

    async fn submit_build(
        &self,
        token: &str,
        request: &SubmitBuildRequest,
    ) -> Result<SubmitBuildResult, PackageServiceError> {
        #[derive(Serialize)]
        struct NewReleaseRequest<'a> {
            #[serde(rename = "Arches")]
            arches: &'a str,
            #[serde(rename = "BaseTag")]
            base_tag: Option<&'a str>,
            #[serde(rename = "Branch")]
            branch: &'a str,
            #[serde(rename = "BuildID")]
            build_id: i64,
            #[serde(rename = "Changelog")]
            changelog: Vec<&'a str>,
            #[serde(rename = "Commit")]
            commit: &'a str,
            #[serde(rename = "ID")]
            id: i64,
            #[serde(rename = "ProjectID")]
            project_id: i64,
            #[serde(rename = "ProjectName")]
            project_name: &'a str,
            #[serde(rename = "Tag")]
            tag: &'a str,
            #[serde(rename = "TopicID")]
            topic_id: i64,
            #[serde(rename = "TopicType")]
            topic_type: &'static str,
            #[serde(rename = "ChangeLogMode")]
            changelog_mode: bool,
            #[serde(rename = "RepoType")]
            repo_type: &'static str,
            #[serde(rename = "Custom")]
            custom: bool,
            #[serde(rename = "BranchID")]
            branch_id: String,
        }

        let url = format!("{}/topics/{}/new_release", self.base_url, request.topic_id);
        let body = NewReleaseRequest {
            arches: &request.arches,
            base_tag: None,
            branch: &request.branch,
            build_id: 0,
            changelog: vec![request.changelog.as_str()],
            commit: &request.commit,
            id: 0,
            project_id: request.project_id,
            project_name: &request.project_name,
            tag: &request.tag,
            topic_id: request.topic_id,
            topic_type: "test",
            changelog_mode: true,
            repo_type: "deb",
            custom: true,
            branch_id: request.branch_id.to_string(),
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        let response = error_checked(response).await?;

        // CRP's success response may be a bare integer id or an object carrying `ID`.
        let raw: serde_json::Value = response.json().await?;
        let build_id = match &raw {
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::Object(obj) => obj
                .get("ID")
                .map(|v| v.to_string())
                .unwrap_or_else(|| "0".to_string()),
            _ => "0".to_string(),
        };

        Ok(SubmitBuildResult {
            url: format!("{}/topics/{}", self.base_url.replace("/api", ""), request.topic_id),
            build_id,
        })
    }

    async fn delete_release(&self, token: &str, release_id: i64) -> Result<bool, PackageServiceError> {
        let url = format!("{}/topic_releases/{release_id}", self.base_url);
        let response = self.client.delete(&url).bearer_auth(token).send().await?;
        Ok(response.status().is_success())
    }

    async fn retry_build(&self, token: &str, release_id: i64) -> Result<bool, PackageServiceError> {
        let url = format!("{}/topic_releases/{release_id}/retry", self.base_url);
        let response = self.client.post(&url).bearer_auth(token).send().await?;
        Ok(response.status().is_success())
    }
}

async fn error_checked(response: reqwest::Response) -> Result<reqwest::Response, PackageServiceError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(PackageServiceError::UnexpectedStatus { status, body })
    }
}
