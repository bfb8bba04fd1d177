use serde::Deserialize;

/// Remote service endpoint configuration.
///
/// Loaded from the environment. When the variables are absent the embedding
/// application should fall back to [`crate::remote::UnconfiguredService`]
/// instead of failing startup; see [`PortalConfig::from_env_optional`].
#[derive(Debug, Clone, Deserialize)]
pub struct PortalConfig {
    /// Base URL of the hosted backend, e.g. `https://xyz.portal.co`.
    pub api_base_url: String,
    /// Publishable API key sent as the `apikey` header.
    pub api_key: String,
    /// Path users land on after OAuth when no explicit return path was given.
    pub default_return_path: String,
}

impl PortalConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            api_base_url: std::env::var("PORTAL_API_URL")
                .map_err(|_| anyhow::anyhow!("PORTAL_API_URL environment variable required"))
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("PORTAL_API_URL cannot be empty");
                    }
                    if !url.starts_with("http://") && !url.starts_with("https://") {
                        anyhow::bail!("PORTAL_API_URL must start with http:// or https://");
                    }
                    Ok(url.trim_end_matches('/').to_string())
                })?,
            api_key: std::env::var("PORTAL_API_KEY")
                .map_err(|_| anyhow::anyhow!("PORTAL_API_KEY environment variable required"))
                .and_then(|key| {
                    if key.trim().is_empty() {
                        anyhow::bail!("PORTAL_API_KEY cannot be empty");
                    }
                    Ok(key)
                })?,
            default_return_path: std::env::var("PORTAL_DEFAULT_RETURN_PATH")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "/dashboard".to_string()),
        };

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!("Portal API URL: {}", config.api_base_url);
        tracing::debug!("Default return path: {}", config.default_return_path);

        Ok(config)
    }

    /// Like [`from_env`](Self::from_env) but treats missing variables as
    /// "no remote service configured" rather than an error, so the session
    /// core can degrade instead of refusing to start.
    pub fn from_env_optional() -> Option<Self> {
        match Self::from_env() {
            Ok(config) => Some(config),
            Err(e) => {
                tracing::warn!("No remote service configured, degrading: {}", e);
                None
            }
        }
    }
}
