//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `PLANTLENS_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `PLANTLENS_` override YAML values
//! 3. **DATABASE_URL** - Special case: overrides `database.url` if set
//! 4. **OPENAI_API_KEY** - Special case: overrides `vision.api_key` if set
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `PLANTLENS_CREDITS__COST_PER_ANALYSIS=2` sets the `credits.cost_per_analysis` field.
//!
//! ## Usage
//!
//! ```no_run
//! use clap::Parser;
//! use plantlens::config::{Args, Config};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let args = Args::parse();
//! let config = Config::load(&args)?;
//!
//! println!("Server will bind to {}:{}", config.host, config.port);
//! # Ok(())
//! # }
//! ```
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! # Override server port
//! PLANTLENS_PORT=8080
//!
//! # Set database connection
//! DATABASE_URL="sqlite://plantlens.db"
//!
//! # Credential for the vision API
//! OPENAI_API_KEY="sk-..."
//!
//! # Override nested values
//! PLANTLENS_AUTH__NATIVE__ALLOW_REGISTRATION=true
//! PLANTLENS_ENABLE_METRICS=true
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::errors::Error;

pub const DEFAULT_SESSION_COOKIE_NAME: &str = "plantlens_session";

/// Prompt sent alongside every image. The section headings in it are the labels the parser
/// looks for, so the two must stay in step.
pub const DEFAULT_VISION_PROMPT: &str = "Analyze this plant image and provide the following information:
1. Plant name
2. Suitable planting locations (house garden or in-house)
3. Benefits of keeping this plant
4. Any important advisory or care tips

Present the information in a structured format.";

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "PLANTLENS_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// All fields have defaults, so an empty file (or no file at all) yields a runnable config once
/// `secret_key` is provided.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Set from the `DATABASE_URL` environment variable; replaces `database.url`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    /// SQLite connection settings
    pub database: DatabaseConfig,
    /// Email address for the initial admin user (created on first startup)
    pub admin_email: String,
    /// Password for the initial admin user
    pub admin_password: Option<String>,
    /// Secret key for signing session tokens (required when native auth is enabled)
    pub secret_key: Option<String>,
    /// Authentication configuration
    pub auth: AuthConfig,
    /// Credit allocation and pricing
    pub credits: CreditsConfig,
    /// Upstream image-understanding service
    pub vision: VisionConfig,
    /// Upload validation rules
    pub uploads: UploadConfig,
    /// Enable Prometheus metrics endpoint at `/internal/metrics`
    pub enable_metrics: bool,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
}

/// SQLite connection pool settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Connection string, e.g. `sqlite://plantlens.db`. The file is created if missing.
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of idle connections to maintain
    pub min_connections: u32,
    /// Maximum time to wait for a connection
    #[serde(with = "humantime_serde")]
    pub acquire_timeout: Duration,
    /// How long a writer waits on a locked database before failing
    #[serde(with = "humantime_serde")]
    pub busy_timeout: Duration,
}

/// Authentication configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// Native username/password authentication
    pub native: NativeAuthConfig,
    /// Security settings (JWT, CORS)
    pub security: SecurityConfig,
}

/// Native username/password authentication configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct NativeAuthConfig {
    /// Enable native authentication (login/registration)
    pub enabled: bool,
    /// Allow new users to self-register
    pub allow_registration: bool,
    /// Password validation rules
    pub password: PasswordConfig,
    /// Session cookie configuration
    pub session: SessionConfig,
}

/// Session cookie configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Session timeout duration
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Cookie name for session token
    pub cookie_name: String,
    /// Set Secure flag on cookies (HTTPS only)
    pub cookie_secure: bool,
    /// SameSite cookie attribute ("strict", "lax", or "none")
    pub cookie_same_site: String,
}

/// Password validation rules.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PasswordConfig {
    /// Minimum password length
    pub min_length: usize,
    /// Maximum password length
    pub max_length: usize,
    /// Argon2 memory cost in KiB
    pub argon2_memory_kib: u32,
    /// Argon2 iterations
    pub argon2_iterations: u32,
    /// Argon2 parallelism
    pub argon2_parallelism: u32,
}

/// Security configuration for JWT and CORS.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecurityConfig {
    /// JWT token expiry duration
    #[serde(with = "humantime_serde")]
    pub jwt_expiry: Duration,
    /// CORS configuration for browser clients
    pub cors: CorsConfig,
}

/// CORS (Cross-Origin Resource Sharing) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins for CORS requests
    pub allowed_origins: Vec<CorsOrigin>,
    /// Allow credentials (cookies) in CORS requests
    pub allow_credentials: bool,
    /// Cache preflight requests for this many seconds
    pub max_age: Option<u64>,
}

/// CORS origin specification.
///
/// Can be either a wildcard (`*`) to allow all origins, or a specific URL.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    /// Allow all origins (`*`)
    #[serde(deserialize_with = "parse_wildcard")]
    Wildcard,
    /// Specific origin URL (e.g., `https://app.example.com`)
    #[serde(deserialize_with = "parse_url")]
    Url(Url),
}

fn parse_wildcard<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    if s == "*" {
        Ok(())
    } else {
        Err(serde::de::Error::custom("Expected '*'"))
    }
}

fn parse_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Url::parse(&s).map_err(serde::de::Error::custom)
}

/// Credit system configuration.
///
/// One analysis costs `cost_per_analysis` credits. Credits are whole numbers.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CreditsConfig {
    /// Credits granted to a user when they register (0 disables the grant)
    pub initial_credits_for_new_users: i64,
    /// Credits debited per successful analysis (0 makes analyses free)
    pub cost_per_analysis: i64,
}

/// Upstream image-understanding service (OpenAI-compatible chat completions).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct VisionConfig {
    /// Base URL; `chat/completions` is appended
    pub base_url: Url,
    /// Bearer credential. Also read from `OPENAI_API_KEY`.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Model name sent with every request
    pub model: String,
    /// Upper bound on the length of the description
    pub max_tokens: u32,
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Text prompt sent with the image
    pub prompt: String,
}

/// Upload validation rules for analysis requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadConfig {
    /// Largest accepted image, in bytes
    pub max_image_bytes: usize,
    /// Accepted MIME types
    pub allowed_content_types: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            database_url: None,
            database: DatabaseConfig::default(),
            admin_email: "admin@example.org".to_string(),
            admin_password: None,
            secret_key: None,
            auth: AuthConfig::default(),
            credits: CreditsConfig::default(),
            vision: VisionConfig::default(),
            uploads: UploadConfig::default(),
            enable_metrics: false,
            enable_otel_export: false,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://plantlens.db".to_string(),
            max_connections: 5,
            min_connections: 0,
            acquire_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for NativeAuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_registration: true,
            password: PasswordConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(24 * 60 * 60), // 24 hours
            cookie_name: DEFAULT_SESSION_COOKIE_NAME.to_string(),
            cookie_secure: true,
            cookie_same_site: "strict".to_string(),
        }
    }
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            min_length: 8,
            max_length: 64,
            // Argon2id RFC recommendations
            argon2_memory_kib: 19456, // 19 MB
            argon2_iterations: 2,
            argon2_parallelism: 1,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            jwt_expiry: Duration::from_secs(24 * 60 * 60), // 24 hours
            cors: CorsConfig::default(),
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![CorsOrigin::Url(
                Url::parse("http://localhost:5173").expect("default CORS origin is a valid URL"),
            )],
            allow_credentials: true,
            max_age: Some(3600), // Cache preflight for 1 hour
        }
    }
}

impl Default for CreditsConfig {
    fn default() -> Self {
        Self {
            initial_credits_for_new_users: 5,
            cost_per_analysis: 1,
        }
    }
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse("https://api.openai.com/v1").expect("default vision URL is valid"),
            api_key: None,
            model: "gpt-4-vision-preview".to_string(),
            max_tokens: 500,
            timeout: Duration::from_secs(60),
            prompt: DEFAULT_VISION_PROMPT.to_string(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_image_bytes: 10 * 1024 * 1024,
            allowed_content_types: ["image/jpeg", "image/png", "image/webp", "image/gif"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let mut config: Self = Self::figment(args).extract()?;

        if let Some(url) = config.database_url.take() {
            config.database.url = url;
        }

        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        if self.auth.native.enabled {
            if self.secret_key.is_none() {
                return Err(Error::Internal {
                    operation: "Config validation: Native authentication is enabled but secret_key is not configured. \
                     Please set PLANTLENS_SECRET_KEY environment variable or add secret_key to config file."
                        .to_string(),
                });
            }

            if self.auth.native.password.min_length > self.auth.native.password.max_length {
                return Err(Error::Internal {
                    operation: format!(
                        "Config validation: Invalid password configuration: min_length ({}) cannot be greater than max_length ({})",
                        self.auth.native.password.min_length, self.auth.native.password.max_length
                    ),
                });
            }
        }

        if self.auth.security.jwt_expiry.as_secs() < 300 {
            return Err(Error::Internal {
                operation: "Config validation: JWT expiry must be at least 5 minutes".to_string(),
            });
        }

        if self.auth.security.jwt_expiry.as_secs() > 86400 * 30 {
            return Err(Error::Internal {
                operation: "Config validation: JWT expiry cannot be longer than 30 days".to_string(),
            });
        }

        if self.auth.security.cors.allowed_origins.is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: CORS allowed_origins cannot be empty".to_string(),
            });
        }

        let has_wildcard = self
            .auth
            .security
            .cors
            .allowed_origins
            .iter()
            .any(|origin| matches!(origin, CorsOrigin::Wildcard));
        if has_wildcard && self.auth.security.cors.allow_credentials {
            return Err(Error::Internal {
                operation: "Config validation: CORS cannot use wildcard origin '*' together with allow_credentials".to_string(),
            });
        }

        if self.credits.initial_credits_for_new_users < 0 || self.credits.cost_per_analysis < 0 {
            return Err(Error::Internal {
                operation: "Config validation: credit settings cannot be negative".to_string(),
            });
        }

        if self.uploads.max_image_bytes == 0 {
            return Err(Error::Internal {
                operation: "Config validation: uploads.max_image_bytes must be greater than 0".to_string(),
            });
        }

        if self.uploads.allowed_content_types.is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: uploads.allowed_content_types cannot be empty".to_string(),
            });
        }

        if self.vision.max_tokens == 0 {
            return Err(Error::Internal {
                operation: "Config validation: vision.max_tokens must be greater than 0".to_string(),
            });
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can override specific values
            .merge(Env::prefixed("PLANTLENS_").ignore(&["config"]).split("__"))
            .merge(Env::raw().only(&["DATABASE_URL"]))
            .merge(Env::raw().only(&["OPENAI_API_KEY"]).map(|_| "vision.api_key".into()))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    fn args(path: &str) -> Args {
        Args {
            config: path.to_string(),
            validate: false,
        }
    }

    #[test]
    fn test_defaults_with_secret_key() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file("test.yaml", "secret_key: hello")?;

            let config = Config::load(&args("test.yaml"))?;

            assert_eq!(config.port, 3001);
            assert_eq!(config.database.url, "sqlite://plantlens.db");
            assert_eq!(config.credits.cost_per_analysis, 1);
            assert_eq!(config.vision.model, "gpt-4-vision-preview");
            assert_eq!(config.vision.max_tokens, 500);
            assert!(config.vision.prompt.contains("Any important advisory or care tips"));
            assert!(config.vision.api_key.is_none());
            assert_eq!(config.bind_address(), "0.0.0.0:3001");

            Ok(())
        });
    }

    #[test]
    fn test_yaml_values() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file(
                "test.yaml",
                r#"
secret_key: "test-secret-key-for-testing"
port: 9000
database:
  url: "sqlite://data/plants.db"
  max_connections: 2
  busy_timeout: 10s
credits:
  initial_credits_for_new_users: 20
  cost_per_analysis: 3
vision:
  base_url: "http://localhost:11434/v1"
  model: "llava"
  timeout: 2m
uploads:
  max_image_bytes: 1024
  allowed_content_types: ["image/png"]
auth:
  native:
    allow_registration: false
    password:
      min_length: 12
  security:
    jwt_expiry: "2h"
"#,
            )?;

            let config = Config::load(&args("test.yaml"))?;

            assert_eq!(config.port, 9000);
            assert_eq!(config.database.url, "sqlite://data/plants.db");
            assert_eq!(config.database.max_connections, 2);
            assert_eq!(config.database.busy_timeout, Duration::from_secs(10));
            assert_eq!(config.credits.initial_credits_for_new_users, 20);
            assert_eq!(config.credits.cost_per_analysis, 3);
            assert_eq!(config.vision.base_url.as_str(), "http://localhost:11434/v1");
            assert_eq!(config.vision.model, "llava");
            assert_eq!(config.vision.timeout, Duration::from_secs(120));
            assert_eq!(config.uploads.max_image_bytes, 1024);
            assert_eq!(config.uploads.allowed_content_types, vec!["image/png".to_string()]);
            assert!(!config.auth.native.allow_registration);
            assert_eq!(config.auth.native.password.min_length, 12);
            assert_eq!(config.auth.native.password.max_length, 64);
            assert_eq!(config.auth.security.jwt_expiry, Duration::from_secs(2 * 60 * 60));

            Ok(())
        });
    }

    #[test]
    fn test_env_override() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file("test.yaml", "secret_key: hello\nport: 9000")?;

            jail.set_env("PLANTLENS_HOST", "127.0.0.1");
            jail.set_env("PLANTLENS_PORT", "8080");
            jail.set_env("PLANTLENS_CREDITS__COST_PER_ANALYSIS", "4");
            jail.set_env("PLANTLENS_CONFIG", "test.yaml");

            let config = Config::load(&args("test.yaml"))?;

            assert_eq!(config.host, "127.0.0.1");
            assert_eq!(config.port, 8080);
            assert_eq!(config.credits.cost_per_analysis, 4);

            Ok(())
        });
    }

    #[test]
    fn test_database_url_and_api_key_from_env() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file(
                "test.yaml",
                r#"
secret_key: hello
database:
  url: "sqlite://from-yaml.db"
  max_connections: 3
"#,
            )?;

            jail.set_env("DATABASE_URL", "sqlite://from-env.db");
            jail.set_env("OPENAI_API_KEY", "sk-from-env");

            let config = Config::load(&args("test.yaml"))?;

            assert_eq!(config.database.url, "sqlite://from-env.db");
            assert_eq!(config.database.max_connections, 3);
            assert!(config.database_url.is_none());
            assert_eq!(config.vision.api_key.as_deref(), Some("sk-from-env"));

            Ok(())
        });
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.set_env("PLANTLENS_SECRET_KEY", "from-env");

            let config = Config::load(&args("does-not-exist.yaml"))?;
            assert_eq!(config.secret_key.as_deref(), Some("from-env"));

            Ok(())
        });
    }

    #[test]
    fn test_unknown_field_rejected() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file("test.yaml", "secret_key: hello\nnot_a_setting: 1")?;

            assert!(Config::load(&args("test.yaml")).is_err());

            Ok(())
        });
    }

    #[test]
    fn test_cors_origins() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file(
                "test.yaml",
                r#"
secret_key: hello
auth:
  security:
    cors:
      allowed_origins: ["*"]
      allow_credentials: false
"#,
            )?;

            let config = Config::load(&args("test.yaml"))?;
            assert!(matches!(config.auth.security.cors.allowed_origins[0], CorsOrigin::Wildcard));

            Ok(())
        });
    }

    #[test]
    fn test_validation_failures() {
        let valid = Config {
            secret_key: Some("secret".to_string()),
            ..Default::default()
        };
        assert!(valid.validate().is_ok());

        let mut no_secret = valid.clone();
        no_secret.secret_key = None;
        assert!(no_secret.validate().unwrap_err().to_string().contains("secret_key"));

        let mut bad_password = valid.clone();
        bad_password.auth.native.password.min_length = 100;
        assert!(bad_password.validate().is_err());

        let mut short_jwt = valid.clone();
        short_jwt.auth.security.jwt_expiry = Duration::from_secs(60);
        assert!(short_jwt.validate().is_err());

        let mut long_jwt = valid.clone();
        long_jwt.auth.security.jwt_expiry = Duration::from_secs(86400 * 31);
        assert!(long_jwt.validate().is_err());

        let mut no_origins = valid.clone();
        no_origins.auth.security.cors.allowed_origins.clear();
        assert!(no_origins.validate().is_err());

        let mut wildcard_with_credentials = valid.clone();
        wildcard_with_credentials.auth.security.cors.allowed_origins = vec![CorsOrigin::Wildcard];
        assert!(wildcard_with_credentials.validate().is_err());

        let mut negative_cost = valid.clone();
        negative_cost.credits.cost_per_analysis = -1;
        assert!(negative_cost.validate().is_err());

        let mut no_upload_size = valid.clone();
        no_upload_size.uploads.max_image_bytes = 0;
        assert!(no_upload_size.validate().is_err());

        let mut no_types = valid.clone();
        no_types.uploads.allowed_content_types.clear();
        assert!(no_types.validate().is_err());

        let mut no_tokens = valid.clone();
        no_tokens.vision.max_tokens = 0;
        assert!(no_tokens.validate().is_err());
    }

    #[test]
    fn test_secret_key_optional_without_native_auth() {
        let mut config = Config::default();
        config.auth.native.enabled = false;
        assert!(config.validate().is_ok());
    }
}
