// src/config.rs
// Process configuration, read once at startup

use thiserror::Error;

pub const DEFAULT_ABACATEPAY_API_URL: &str = "https://api.abacatepay.com/v1";

pub const ENV_ABACATEPAY_API_KEY: &str = "ABACATEPAY_API_KEY";
pub const ENV_ABACATEPAY_API_URL: &str = "ABACATEPAY_API_URL";
pub const ENV_SUPABASE_URL: &str = "SUPABASE_URL";
pub const ENV_SUPABASE_SERVICE_ROLE_KEY: &str = "SUPABASE_SERVICE_ROLE_KEY";
pub const ENV_EXPOSE_ERROR_DETAILS: &str = "CHECKER_EXPOSE_ERROR_DETAILS";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Missing required environment variables: {}", .0.join(", "))]
    Missing(Vec<&'static str>),
}

// ═══════════════════════════════════════════════════════════════════════════════
// ABACATEPAY CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct AbacatePayConfig {
    pub api_key: String,
    pub api_url: String,
}

// Hand-written so the key never ends up in a log line.
impl std::fmt::Debug for AbacatePayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbacatePayConfig")
            .field("api_key", &"<redacted>")
            .field("api_url", &self.api_url)
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SUPABASE CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub service_role_key: String,
}

impl std::fmt::Debug for SupabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseConfig")
            .field("url", &self.url)
            .field("service_role_key", &"<redacted>")
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CHECKER CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct CheckerConfig {
    pub abacatepay: AbacatePayConfig,
    pub supabase: SupabaseConfig,
    /// When set, unexpected-error responses carry the error chain.
    pub expose_error_details: bool,
}

impl CheckerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Blank values count as absent.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let api_key = get(ENV_ABACATEPAY_API_KEY);
        let supabase_url = get(ENV_SUPABASE_URL);
        let service_role_key = get(ENV_SUPABASE_SERVICE_ROLE_KEY);

        let (api_key, supabase_url, service_role_key) =
            match (api_key, supabase_url, service_role_key) {
                (Some(a), Some(u), Some(k)) => (a, u, k),
                (a, u, k) => {
                    let mut missing = Vec::new();
                    if a.is_none() {
                        missing.push(ENV_ABACATEPAY_API_KEY);
                    }
                    if u.is_none() {
                        missing.push(ENV_SUPABASE_URL);
                    }
                    if k.is_none() {
                        missing.push(ENV_SUPABASE_SERVICE_ROLE_KEY);
                    }
                    return Err(ConfigError::Missing(missing));
                }
            };

        let api_url = get(ENV_ABACATEPAY_API_URL)
            .unwrap_or_else(|| DEFAULT_ABACATEPAY_API_URL.to_string());

        let expose_error_details = get(ENV_EXPOSE_ERROR_DETAILS)
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            abacatepay: AbacatePayConfig {
                api_key,
                api_url: api_url.trim_end_matches('/').to_string(),
            },
            supabase: SupabaseConfig {
                url: supabase_url.trim_end_matches('/').to_string(),
                service_role_key,
            },
            expose_error_details,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SERVER CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);
        Self { port }
    }
}
