use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Allow permissive CORS fallback
    #[serde(default)]
    pub cors_allow_any_origin: bool,

    /// CORS: allow credentials
    #[serde(default)]
    pub cors_allow_credentials: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    #[validate(custom = "validate_event_channel_capacity")]
    pub event_channel_capacity: usize,

    // ========== Payment processor ==========
    /// Secret API key for the payment processor
    pub processor_secret_key: String,

    /// Base URL of the processor REST API
    #[serde(default = "default_processor_api_base")]
    pub processor_api_base: String,

    /// Webhook secret for verifying processor event signatures.
    /// When unset, verification is skipped (development only).
    #[serde(default)]
    pub processor_webhook_secret: Option<String>,

    /// Webhook timestamp tolerance (seconds)
    #[serde(default)]
    pub processor_webhook_tolerance_secs: Option<u64>,

    /// Storefront base URL, used for default success/cancel redirects
    #[serde(default = "default_frontend_url")]
    pub frontend_url: String,

    /// Currency for checkout sessions (ISO 4217, lowercase at the processor)
    #[serde(default = "default_currency")]
    pub default_currency: String,

    /// Flat fee charged for home delivery, in major units
    #[serde(default = "default_home_delivery_fee")]
    pub home_delivery_fee: Decimal,

    // ========== Transactional email ==========
    /// API key for the transactional email provider.
    /// When unset, notification dispatch is disabled.
    #[serde(default)]
    pub email_api_key: Option<String>,

    /// Base URL of the email provider REST API
    #[serde(default = "default_email_api_base")]
    pub email_api_base: String,

    /// Sender identity for admin alerts
    #[serde(default = "default_email_sender_name")]
    pub email_sender_name: String,
    #[serde(default)]
    pub email_sender_address: Option<String>,

    /// Recipient of new-order admin alerts
    #[serde(default)]
    pub admin_email: Option<String>,

    /// Provider template IDs for order status emails
    #[serde(default = "default_template_confirmed")]
    pub email_template_confirmed: i64,
    #[serde(default = "default_template_preparing")]
    pub email_template_preparing: i64,
    #[serde(default = "default_template_shipped")]
    pub email_template_shipped: i64,
}

impl AppConfig {
    /// Gets database URL reference
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Gets the configured log level
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Whether we should fall back to permissive CORS
    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }

    /// Template ID for a fulfillment status, if one is configured
    pub fn template_for_status(&self, status: &str) -> Option<i64> {
        match status {
            "confirmed" => Some(self.email_template_confirmed),
            "preparing" => Some(self.email_template_preparing),
            "shipped" => Some(self.email_template_shipped),
            _ => None,
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_min_connections() -> u32 {
    1
}

fn default_db_connect_timeout_secs() -> u64 {
    30
}

fn default_db_idle_timeout_secs() -> u64 {
    600
}

fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_processor_api_base() -> String {
    "https://api.stripe.com/v1".to_string()
}

fn default_frontend_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_currency() -> String {
    "eur".to_string()
}

fn default_home_delivery_fee() -> Decimal {
    Decimal::new(500, 2) // 5.00
}

fn default_email_api_base() -> String {
    "https://api.brevo.com/v3".to_string()
}

fn default_email_sender_name() -> String {
    "Storefront".to_string()
}

fn default_template_confirmed() -> i64 {
    23
}

fn default_template_preparing() -> i64 {
    24
}

fn default_template_shipped() -> i64 {
    25
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_event_channel_capacity(capacity: usize) -> Result<(), ValidationError> {
    if capacity == 0 {
        let mut err = ValidationError::new("event_channel_capacity");
        err.message = Some("event_channel_capacity must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::fmt;

    let default_directive = format!("storefront_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt().with_env_filter(filter_directive).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter_directive).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Default config (config/default.toml)
/// 2. Environment-specific config (config/{env}.toml)
/// 3. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let builder = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false));

    let config = builder
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    // Check for the processor key before deserialization to give a clear error
    if config.get_string("processor_secret_key").is_err() {
        error!("Payment processor key is not configured. Set APP__PROCESSOR_SECRET_KEY.");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "processor_secret_key is required but not configured. Set APP__PROCESSOR_SECRET_KEY."
                .into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
