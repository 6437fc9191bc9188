use crate::enrichment::GenerationPolicy;
use std::time::Duration;

pub const DEFAULT_IMAGE_API_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/imagen-3.0-generate-002:predict";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub image_api_url: String,
    pub image_api_key: String,
    pub generation_timeout: Duration,
    pub generation_policy: GenerationPolicy,
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_vars(|name| std::env::var(name).ok())?;

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!("Image API URL: {}", config.image_api_url);
        tracing::debug!("Generation timeout: {:?}", config.generation_timeout);
        tracing::debug!("Generation policy: {:?}", config.generation_policy);
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }

    /// Builds a config from a variable lookup, validating every value.
    pub fn from_vars<F>(var: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            port: var("PORT")
                .unwrap_or_else(|| "3000".to_string())
                .parse()
                .ok()
                .filter(|port: &u16| *port > 0)
                .ok_or_else(|| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            image_api_url: var("IMAGE_API_URL")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_IMAGE_API_URL.to_string())
                .parse::<url::Url>()
                .map_err(|e| anyhow::anyhow!("IMAGE_API_URL is not a valid URL: {}", e))
                .and_then(|url| {
                    if url.scheme() != "http" && url.scheme() != "https" {
                        anyhow::bail!("IMAGE_API_URL must start with http:// or https://");
                    }
                    Ok(url.to_string())
                })?,
            image_api_key: var("IMAGE_API_KEY")
                .ok_or_else(|| anyhow::anyhow!("IMAGE_API_KEY environment variable required"))
                .and_then(|key| {
                    if key.trim().is_empty() {
                        anyhow::bail!("IMAGE_API_KEY cannot be empty");
                    }
                    Ok(key)
                })?,
            generation_timeout: var("GENERATION_TIMEOUT_SECS")
                .unwrap_or_else(|| "30".to_string())
                .parse()
                .ok()
                .filter(|secs: &u64| *secs > 0)
                .map(Duration::from_secs)
                .ok_or_else(|| {
                    anyhow::anyhow!("GENERATION_TIMEOUT_SECS must be a positive number of seconds")
                })?,
            generation_policy: match var("GENERATION_SINGLE_FLIGHT").as_deref().map(str::trim) {
                None | Some("") | Some("false") | Some("0") => GenerationPolicy::PerRecord,
                Some("true") | Some("1") => GenerationPolicy::SingleFlight,
                Some(other) => anyhow::bail!(
                    "GENERATION_SINGLE_FLIGHT must be true or false, got '{}'",
                    other
                ),
            },
            max_upload_bytes: var("MAX_UPLOAD_BYTES")
                .unwrap_or_else(|| (5 * 1024 * 1024).to_string())
                .parse()
                .ok()
                .filter(|bytes: &usize| *bytes > 0)
                .ok_or_else(|| anyhow::anyhow!("MAX_UPLOAD_BYTES must be a positive number"))?,
        })
    }
}
