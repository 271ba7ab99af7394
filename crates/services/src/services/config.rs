use relforge_db::models::global_config::{ConfigError, GlobalConfig, UpdateGlobalConfig};
use sqlx::SqlitePool;

/// Thin wrapper around the `global_config` singleton, mirroring the rest of
/// this crate's `*Service` shape so callers don't reach into `relforge-db` directly.
#[derive(Clone)]
pub struct ConfigService {
    pool: SqlitePool,
}

impl ConfigService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self) -> Result<GlobalConfig, ConfigError> {
        GlobalConfig::get(&self.pool).await
    }

    pub async fn update(&self, patch: &UpdateGlobalConfig) -> Result<GlobalConfig, ConfigError> {
        GlobalConfig::update(&self.pool, patch).await
    }

    pub async fn local_clone_root(&self) -> Result<String, ConfigError> {
        Ok(self.get().await?.local_clone_root)
    }
}
