use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("missing credential: {0}")]
    MissingCredential(&'static str),
}

/// Singleton (`id = 1`) row holding credential material and defaults shared by
/// every project. Created lazily on first access.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub id: i64,
    pub ldap_username: Option<String>,
    pub ldap_password: Option<String>,
    pub forge_token: Option<String>,
    pub forge_username: Option<String>,
    pub package_service_token: Option<String>,
    pub package_service_branch_id: Option<i64>,
    pub package_service_topic_type: String,
    pub proxy_url: Option<String>,
    pub local_clone_root: String,
    pub debemail_name: Option<String>,
    pub debemail_email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateGlobalConfig {
    pub ldap_username: Option<String>,
    pub ldap_password: Option<String>,
    pub forge_token: Option<String>,
    pub forge_username: Option<String>,
    pub package_service_token: Option<String>,
    pub package_service_branch_id: Option<i64>,
    pub package_service_topic_type: Option<String>,
    pub proxy_url: Option<String>,
    pub local_clone_root: Option<String>,
    pub debemail_name: Option<String>,
    pub debemail_email: Option<String>,
}

impl GlobalConfig {
    /// Load the singleton row, creating it with defaults if it does not exist yet.
    pub async fn get(pool: &SqlitePool) -> Result<Self, ConfigError> {
        if let Some(config) = sqlx::query_as::<_, GlobalConfig>(
            "SELECT id, ldap_username, ldap_password, forge_token, forge_username,
                    package_service_token, package_service_branch_id, package_service_topic_type,
                    proxy_url, local_clone_root, debemail_name, debemail_email
             FROM global_config WHERE id = 1",
        )
        .fetch_optional(pool)
        .await?
        {
            return Ok(config);
        }

        sqlx::query("INSERT OR IGNORE INTO global_config (id) VALUES (1)")
            .execute(pool)
            .await?;

        let config = sqlx::query_as::<_, GlobalConfig>(
            "SELECT id, ldap_username, ldap_password, forge_token, forge_username,
                    package_service_token, package_service_branch_id, package_service_topic_type,
                    proxy_url, local_clone_root, debemail_name, debemail_email
             FROM global_config WHERE id = 1",
        )
        .fetch_one(pool)
        .await?;

        Ok(config)
    }

    pub async fn update(pool: &SqlitePool, patch: &UpdateGlobalConfig) -> Result<Self, ConfigError> {
        // Ensure the singleton row exists before patching it.
        Self::get(pool).await?;

        sqlx::query(
            r#"UPDATE global_config SET
                 ldap_username = COALESCE(?, ldap_username),
                 ldap_password = COALESCE(?, ldap_password),
                 forge_token = COALESCE(?, forge_token),
                 forge_username = COALESCE(?, forge_username),
                 package_service_token = COALESCE(?, package_service_token),
                 package_service_branch_id = COALESCE(?, package_service_branch_id),
                 package_service_topic_type = COALESCE(?, package_service_topic_type),
                 proxy_url = COALESCE(?, proxy_url),
                 local_clone_root = COALESCE(?, local_clone_root),
                 debemail_name = COALESCE(?, debemail_name),
                 debemail_email = COALESCE(?, debemail_email),
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
               WHERE id = 1"#,
        )
        .bind(&patch.ldap_username)
        .bind(&patch.ldap_password)
        .bind(&patch.forge_token)
        .bind(&patch.forge_username)
        .bind(&patch.package_service_token)
        .bind(patch.package_service_branch_id)
        .bind(&patch.package_service_topic_type)
        .bind(&patch.proxy_url)
        .bind(&patch.local_clone_root)
        .bind(&patch.debemail_name)
        .bind(&patch.debemail_email)
        .execute(pool)
        .await?;

        Self::get(pool).await
    }

    pub fn require_ldap_credentials(&self) -> Result<(&str, &str), ConfigError> {
        let username = self
            .ldap_username
            .as_deref()
            .ok_or(ConfigError::MissingCredential("ldap_username"))?;
        let password = self
            .ldap_password
            .as_deref()
            .ok_or(ConfigError::MissingCredential("ldap_password"))?;
        Ok((username, password))
    }

    pub fn require_forge_token(&self) -> Result<&str, ConfigError> {
        self.forge_token
            .as_deref()
            .ok_or(ConfigError::MissingCredential("forge_token"))
    }

    pub fn require_forge_username(&self) -> Result<&str, ConfigError> {
        self.forge_username
            .as_deref()
            .ok_or(ConfigError::MissingCredential("forge_username"))
    }

    pub fn require_package_service_token(&self) -> Result<&str, ConfigError> {
        self.package_service_token
            .as_deref()
            .ok_or(ConfigError::MissingCredential("package_service_token"))
    }

    pub fn require_package_service_branch_id(&self) -> Result<i64, ConfigError> {
        self.package_service_branch_id
            .ok_or(ConfigError::MissingCredential("package_service_branch_id"))
    }

    pub fn debemail(&self) -> Option<String> {
        match (&self.debemail_name, &self.debemail_email) {
            (Some(name), Some(email)) => Some(format!("{name} <{email}>")),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .expect("in-memory pool");
        sqlx::query(include_str!("../../migrations/0001_init.sql"))
            .execute(&pool)
            .await
            .expect("apply schema");
        pool
    }

    #[tokio::test]
    async fn get_creates_singleton_row_lazily() {
        let pool = setup_pool().await;
        let config = GlobalConfig::get(&pool).await.expect("load");
        assert_eq!(config.id, 1);
        assert_eq!(config.package_service_topic_type, "test");
    }

    #[tokio::test]
    async fn update_patches_only_provided_fields() {
        let pool = setup_pool().await;
        GlobalConfig::get(&pool).await.expect("load");

        let patched = GlobalConfig::update(
            &pool,
            &UpdateGlobalConfig {
                ldap_username: Some("alice".into()),
                ..Default::default()
            },
        )
        .await
        .expect("patch");

        assert_eq!(patched.ldap_username.as_deref(), Some("alice"));
        assert_eq!(patched.package_service_topic_type, "test");
    }

    #[tokio::test]
    async fn missing_ldap_credentials_are_surfaced_not_swallowed() {
        let pool = setup_pool().await;
        let config = GlobalConfig::get(&pool).await.expect("load");
        let err = config.require_ldap_credentials().unwrap_err();
        assert!(matches!(err, ConfigError::MissingCredential("ldap_username")));
    }
}
