use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub jwt: JwtConfig,
    #[serde(default)]
    pub otp: OtpConfig,
    #[serde(default)]
    pub mail: MailConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    #[serde(default = "default_jwt_secret")]
    pub secret: String,
    #[serde(default)]
    pub previous_secrets: Vec<String>,
    #[serde(default = "default_access_token_expire")]
    pub access_token_expire_minutes: u64,
}

/// One-time-password settings. The TTL is the single source for both the
/// server-side challenge expiry and the activation countdown window.
#[derive(Debug, Clone, Deserialize)]
pub struct OtpConfig {
    #[serde(default = "default_otp_ttl")]
    pub ttl_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    #[serde(default = "default_mail_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub sender_email: String,
    #[serde(default = "default_mail_sender_name")]
    pub sender_name: String,
    #[serde(default = "default_mail_timeout")]
    pub timeout_secs: u64,
}

impl MailConfig {
    /// The dispatcher needs both a key and a sender identity to be usable.
    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty() && !self.sender_email.trim().is_empty()
    }
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    1309
}

fn default_db_path() -> String {
    "data/item-retriever.db".to_string()
}

fn default_jwt_secret() -> String {
    // Generate a random secret if not configured
    "your-super-secret-key-change-it".to_string()
}

fn default_access_token_expire() -> u64 {
    60 // 1 hour
}

fn default_otp_ttl() -> u64 {
    300 // 5 minutes
}

fn default_mail_api_url() -> String {
    "https://api.brevo.com/v3/smtp/email".to_string()
}

fn default_mail_sender_name() -> String {
    "Item Retriever".to_string()
}

fn default_mail_timeout() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: default_jwt_secret(),
            previous_secrets: Vec::new(),
            access_token_expire_minutes: default_access_token_expire(),
        }
    }
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_otp_ttl(),
        }
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            api_url: default_mail_api_url(),
            api_key: String::new(),
            sender_email: String::new(),
            sender_name: default_mail_sender_name(),
            timeout_secs: default_mail_timeout(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            jwt: JwtConfig::default(),
            otp: OtpConfig::default(),
            mail: MailConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_env_overrides();
        config.ensure_directories()?;
        config.ensure_jwt_secret()?;
        Ok(config)
    }

    /// Ensure JWT secret is secure and persisted
    fn ensure_jwt_secret(&mut self) -> anyhow::Result<()> {
        // If secret is the default one or empty
        if self.jwt.secret == default_jwt_secret() || self.jwt.secret.is_empty() {
            let secret_path = Path::new("data/.jwt_secret");

            if secret_path.exists() {
                // Load existing secret
                let secret = fs::read_to_string(secret_path)?;
                self.jwt.secret = secret.trim().to_string();
                tracing::info!("Loaded persisted JWT secret from data/.jwt_secret");
            } else {
                // Generate new strong secret
                let secret = uuid::Uuid::new_v4().to_string();

                // Ensure data directory exists
                if let Some(parent) = secret_path.parent() {
                    fs::create_dir_all(parent)?;
                }

                // Save to file
                fs::write(secret_path, &secret)?;
                self.jwt.secret = secret;
                tracing::info!("Generated and persisted new JWT secret to data/.jwt_secret");
            }
        }
        Ok(())
    }

    /// Load configuration from conf.ini or config.toml
    fn load_from_file() -> anyhow::Result<Self> {
        let config_paths = ["conf.ini", "config.toml", "data/conf.ini", "data/config.toml"];

        for path in config_paths {
            if Path::new(path).exists() {
                let content = fs::read_to_string(path)?;
                let config: Config = toml::from_str(&content)?;
                tracing::info!("Loaded configuration from {}", path);
                return Ok(config);
            }
        }

        tracing::info!("No configuration file found, using defaults");
        Ok(Config::default())
    }

    /// Apply environment variable overrides
    /// Format: IR_CONF_<SECTION>_<KEY>
    fn apply_env_overrides(&mut self) {
        // Server overrides
        if let Ok(val) = env::var("IR_CONF_SERVER_HOST") {
            self.server.host = val;
        }
        if let Ok(val) = env::var("IR_CONF_SERVER_PORT") {
            if let Ok(port) = val.parse() {
                self.server.port = port;
            }
        }

        // Database overrides
        if let Ok(val) = env::var("IR_CONF_DATABASE_PATH") {
            self.database.path = val;
        }

        // JWT overrides
        if let Ok(val) = env::var("IR_CONF_JWT_SECRET") {
            self.jwt.secret = val;
        }
        if let Ok(val) = env::var("IR_CONF_JWT_PREVIOUS_SECRETS") {
            self.jwt.previous_secrets = val
                .split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .collect();
        }
        if let Ok(val) = env::var("IR_CONF_JWT_ACCESS_EXPIRE") {
            if let Ok(minutes) = val.parse() {
                self.jwt.access_token_expire_minutes = minutes;
            }
        }

        // OTP overrides
        if let Ok(val) = env::var("IR_CONF_OTP_TTL") {
            if let Ok(secs) = val.parse() {
                self.otp.ttl_seconds = secs;
            }
        }

        // Mail overrides
        if let Ok(val) = env::var("IR_CONF_MAIL_API_URL") {
            if !val.trim().is_empty() {
                self.mail.api_url = val;
            }
        }
        if let Ok(val) = env::var("IR_CONF_MAIL_API_KEY") {
            self.mail.api_key = val;
        }
        if let Ok(val) = env::var("IR_CONF_MAIL_SENDER_EMAIL") {
            self.mail.sender_email = val;
        }
        if let Ok(val) = env::var("IR_CONF_MAIL_SENDER_NAME") {
            if !val.trim().is_empty() {
                self.mail.sender_name = val;
            }
        }

        if let Ok(val) = env::var("IR_CONF_MAIL_TIMEOUT") {
            if let Ok(secs) = val.parse() {
                self.mail.timeout_secs = secs;
            }
        }
    }

    /// Ensure required directories exist
    fn ensure_directories(&self) -> anyhow::Result<()> {
        // Ensure database directory exists
        if let Some(parent) = Path::new(&self.database.path).parent() {
            fs::create_dir_all(parent)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_consistent() {
        let config = Config::default();
        assert_eq!(config.otp.ttl_seconds, 300);
        assert_eq!(config.server.port, 1309);
        assert!(!config.mail.is_configured());
    }

    #[test]
    fn mail_is_configured_requires_key_and_sender() {
        let mut mail = MailConfig::default();
        mail.api_key = "key".to_string();
        assert!(!mail.is_configured());
        mail.sender_email = "no-reply@itemretriever.com".to_string();
        assert!(mail.is_configured());
    }

    #[test]
    fn env_overrides_apply() {
        env::set_var("IR_CONF_OTP_TTL", "120");
        env::set_var("IR_CONF_MAIL_SENDER_EMAIL", "otp@itemretriever.com");
        let mut config = Config::default();
        config.apply_env_overrides();
        env::remove_var("IR_CONF_OTP_TTL");
        env::remove_var("IR_CONF_MAIL_SENDER_EMAIL");
        assert_eq!(config.otp.ttl_seconds, 120);
        assert_eq!(config.mail.sender_email, "otp@itemretriever.com");
    }

    #[test]
    fn toml_sections_parse() {
        let raw = r#"
            [server]
            port = 8080

            [otp]
            ttl_seconds = 60

            [mail]
            api_key = "k"
            sender_email = "s@example.com"
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.otp.ttl_seconds, 60);
        assert!(config.mail.is_configured());
    }
}
