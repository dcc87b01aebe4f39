use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::util::is_local_endpoint_url;

pub const DEFAULT_API_URL: &str = "http://localhost:8000/v1/chat-stream";
pub const DEFAULT_DEPLOYMENT: &str = "Cohere Platform";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api_key: Option<String>,
    pub api_url: String,
    pub deployment: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        let api_url =
            std::env::var("DUET_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let api_key = std::env::var("DUET_API_KEY").ok().and_then(|v| {
            if v.trim().is_empty() {
                None
            } else {
                Some(v)
            }
        });
        let deployment =
            std::env::var("DUET_DEPLOYMENT").unwrap_or_else(|_| DEFAULT_DEPLOYMENT.to_string());

        Ok(Self {
            api_key,
            api_url,
            deployment,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            bail!(
                "Invalid DUET_API_URL '{}': expected http:// or https:// URL",
                self.api_url
            );
        }

        if !self.is_local_endpoint() && self.api_key.is_none() {
            bail!(
                "DUET_API_KEY must be set for non-local endpoints (url: '{}')",
                self.api_url
            );
        }

        if self.deployment.trim().is_empty() {
            bail!("DUET_DEPLOYMENT must not be empty");
        }

        Ok(())
    }

    pub fn is_local_endpoint(&self) -> bool {
        is_local_endpoint_url(&self.api_url)
    }
}
