//! Where the background service sends its requests.

use serde_json::Value;

use crate::error::Result;
use crate::storage::{Storage, Tier};

pub const CLOUD_API_URL: &str = "https://api.codecov.io/api/v2";
pub const GITHUB_PROVIDER: &str = "github";
pub const GITHUB_ENTERPRISE_PROVIDER: &str = "github_enterprise";

pub const USE_SELF_HOSTED_KEY: &str = "use_self_hosted";
pub const SELF_HOSTED_CODECOV_URL_KEY: &str = "self_hosted_codecov_url";
pub const SELF_HOSTED_API_TOKEN_KEY: &str = "self_hosted_codecov_api_token";

/// How long flag and component lists stay cached, in seconds.
pub const LIST_CACHE_TTL_SECS: i64 = 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Base of the v2 API, without a trailing slash.
    pub api_url: String,
    /// Provider segment of API paths.
    pub service: String,
    pub token: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            api_url: CLOUD_API_URL.to_string(),
            service: GITHUB_PROVIDER.to_string(),
            token: None,
        }
    }
}

impl ServiceConfig {
    pub fn new(api_url: &str, service: &str, token: Option<String>) -> Self {
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            service: service.to_string(),
            token: token.filter(|t| !t.is_empty()),
        }
    }

    /// Read the self-hosted settings from the synced storage tier. Without
    /// them the cloud service is used.
    pub async fn from_storage<S: Storage + ?Sized>(storage: &S) -> Result<Self> {
        let self_hosted = matches!(
            storage.get(Tier::Sync, USE_SELF_HOSTED_KEY).await?,
            Some(Value::Bool(true))
        );
        if !self_hosted {
            return Ok(Self::default());
        }
        let url = match storage.get(Tier::Sync, SELF_HOSTED_CODECOV_URL_KEY).await? {
            Some(Value::String(url)) if !url.is_empty() => url,
            _ => return Ok(Self::default()),
        };
        let token = match storage.get(Tier::Sync, SELF_HOSTED_API_TOKEN_KEY).await? {
            Some(Value::String(token)) => Some(token),
            _ => None,
        };
        let api_url = format!("{}/api/v2", url.trim_end_matches('/'));
        Ok(Self::new(&api_url, GITHUB_ENTERPRISE_PROVIDER, token))
    }
}
