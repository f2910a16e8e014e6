use crate::models::{SubscriptionTier, UserProfile};
use secrecy::Secret;
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default window of prior messages sent along with a prompt.
const DEFAULT_CONTEXT_WINDOW: usize = 5;

#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub backend: BackendConfig,
    pub gateway: GatewaySettings,
    pub chat: ChatSettings,
    pub usage: UsageSettings,
    pub search: SearchSettings,
    pub citations: CitationSettings,
    pub user: UserSettings,
}

/// Hosted backend endpoints and keys.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// REST root of the relational store, e.g. `https://x.example.co/rest/v1`.
    pub rest_url: String,
    /// Root of the serverless functions, e.g. `https://x.example.co/functions/v1`.
    pub functions_url: String,
    pub anon_key: Secret<String>,
    /// Signed-in user's JWT; falls back to the anon key when absent.
    pub access_token: Option<Secret<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySettings {
    pub function_name: String,
    pub model: String,
    pub fast_mode: bool,
    pub enhance_with_nys_data: bool,
    pub timeout_secs: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            function_name: "generate-with-openai".to_string(),
            model: "gpt-4o".to_string(),
            fast_mode: false,
            enhance_with_nys_data: true,
            timeout_secs: 120,
        }
    }
}

impl GatewaySettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatSettings {
    /// How many prior messages accompany each prompt.
    pub context_window: usize,
    /// Stream the opening analysis instead of waiting for the whole answer.
    pub stream_initial_analysis: bool,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            context_window: DEFAULT_CONTEXT_WINDOW,
            stream_initial_analysis: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UsageSettings {
    pub storage_dir: PathBuf,
    /// Accounts with no word limit.
    pub admin_emails: Vec<String>,
}

impl Default for UsageSettings {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from(".civic-chat/usage"),
            admin_emails: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchSettings {
    pub staleness_secs: u64,
    pub debounce_ms: u64,
    pub page_size: u32,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            staleness_secs: 60,
            debounce_ms: 150,
            page_size: 20,
        }
    }
}

impl SearchSettings {
    pub fn staleness(&self) -> Duration {
        Duration::from_secs(self.staleness_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CitationSettings {
    /// The application's own domain, used for the self-reliance score.
    pub app_domain: String,
    /// Percentage above which self-citations invalidate a report.
    pub self_reliance_threshold: f64,
}

impl Default for CitationSettings {
    fn default() -> Self {
        Self {
            app_domain: "civicchat.app".to_string(),
            self_reliance_threshold: 50.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserSettings {
    pub user_id: String,
    pub email: Option<String>,
    pub tier: SubscriptionTier,
}

impl UserSettings {
    pub fn profile(&self) -> UserProfile {
        UserProfile::new(self.user_id.clone(), self.email.clone(), self.tier)
    }
}

impl ChatConfig {
    pub fn load() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;
        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";

        let gateway_defaults = GatewaySettings::default();
        let chat_defaults = ChatSettings::default();
        let search_defaults = SearchSettings::default();
        let citation_defaults = CitationSettings::default();

        Ok(ChatConfig {
            common: common_config,
            backend: BackendConfig {
                rest_url: get_env("BACKEND_REST_URL", None, is_prod)?,
                functions_url: get_env("BACKEND_FUNCTIONS_URL", None, is_prod)?,
                anon_key: Secret::new(get_env("BACKEND_ANON_KEY", None, is_prod)?),
                access_token: env::var("BACKEND_ACCESS_TOKEN")
                    .ok()
                    .filter(|t| !t.is_empty())
                    .map(Secret::new),
            },
            gateway: GatewaySettings {
                function_name: get_env(
                    "GATEWAY_FUNCTION",
                    Some(&gateway_defaults.function_name),
                    is_prod,
                )?,
                model: get_env("GATEWAY_MODEL", Some(&gateway_defaults.model), is_prod)?,
                fast_mode: parse_bool(&get_env("GATEWAY_FAST_MODE", Some("false"), is_prod)?),
                enhance_with_nys_data: parse_bool(&get_env(
                    "GATEWAY_ENHANCE_WITH_NYS_DATA",
                    Some("true"),
                    is_prod,
                )?),
                timeout_secs: get_env("GATEWAY_TIMEOUT_SECS", Some("120"), is_prod)?
                    .parse()
                    .unwrap_or(gateway_defaults.timeout_secs),
            },
            chat: ChatSettings {
                context_window: get_env(
                    "CHAT_CONTEXT_WINDOW",
                    Some(&DEFAULT_CONTEXT_WINDOW.to_string()),
                    is_prod,
                )?
                .parse()
                .unwrap_or(chat_defaults.context_window),
                stream_initial_analysis: parse_bool(&get_env(
                    "CHAT_STREAM_INITIAL_ANALYSIS",
                    Some("true"),
                    is_prod,
                )?),
            },
            usage: UsageSettings {
                storage_dir: PathBuf::from(get_env(
                    "USAGE_STORAGE_DIR",
                    Some(".civic-chat/usage"),
                    is_prod,
                )?),
                admin_emails: split_list(&get_env("USAGE_ADMIN_EMAILS", Some(""), is_prod)?),
            },
            search: SearchSettings {
                staleness_secs: get_env("SEARCH_STALENESS_SECS", Some("60"), is_prod)?
                    .parse()
                    .unwrap_or(search_defaults.staleness_secs),
                debounce_ms: get_env("SEARCH_DEBOUNCE_MS", Some("150"), is_prod)?
                    .parse()
                    .unwrap_or(search_defaults.debounce_ms),
                page_size: get_env("SEARCH_PAGE_SIZE", Some("20"), is_prod)?
                    .parse()
                    .unwrap_or(search_defaults.page_size),
            },
            citations: CitationSettings {
                app_domain: get_env("APP_DOMAIN", Some(&citation_defaults.app_domain), is_prod)?,
                self_reliance_threshold: get_env(
                    "CITATION_SELF_RELIANCE_THRESHOLD",
                    Some("50"),
                    is_prod,
                )?
                .parse()
                .unwrap_or(citation_defaults.self_reliance_threshold),
            },
            user: UserSettings {
                user_id: get_env("CIVIC_USER_ID", None, is_prod)?,
                email: env::var("CIVIC_USER_EMAIL").ok().filter(|e| !e.is_empty()),
                tier: SubscriptionTier::parse(&get_env("CIVIC_USER_TIER", Some("free"), is_prod)?),
            },
        })
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert!(parse_bool("TRUE"));
        assert!(parse_bool(" 1 "));
        assert!(parse_bool("yes"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool(""));
    }

    #[test]
    fn split_list_normalizes_emails() {
        assert_eq!(
            split_list(" Admin@Example.org, ,ops@example.org"),
            vec!["admin@example.org".to_string(), "ops@example.org".to_string()]
        );
    }

    #[test]
    fn missing_required_value_is_a_config_error() {
        let result = get_env("CIVIC_CHAT_TEST_SURELY_UNSET", None, false);
        assert!(matches!(result, Err(AppError::ConfigError(_))));

        let defaulted = get_env("CIVIC_CHAT_TEST_SURELY_UNSET", Some("fallback"), false).unwrap();
        assert_eq!(defaulted, "fallback");
    }

    #[test]
    fn defaults_match_documented_windows() {
        let search = SearchSettings::default();
        assert_eq!(search.staleness(), Duration::from_secs(60));
        assert_eq!(search.debounce(), Duration::from_millis(150));
        assert_eq!(ChatSettings::default().context_window, 5);
    }
}
