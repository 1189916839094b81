use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Settings {
    runtime: RuntimeSettings,
    database: DatabaseSettings,
    ai: AiSettings,
    budget: BudgetSettings,
    uploads: UploadSettings,
    s3: S3Settings,
    rubrics: RubricSettings,
    worker: WorkerSettings,
    telemetry: TelemetrySettings,
}

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub environment: Environment,
    pub strict_config: bool,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub postgres_server: String,
    pub postgres_port: u16,
    pub postgres_user: String,
    pub postgres_password: String,
    pub postgres_db: String,
    pub database_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AiSettings {
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub grading_model: String,
    pub vision_model: String,
    pub max_tokens: u32,
    pub grading_temperature: f64,
    pub vision_temperature: f64,
    pub request_timeout_seconds: u64,
    pub vision_timeout_seconds: u64,
    pub vision_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct BudgetSettings {
    pub token_cap: usize,
    pub token_hard_limit: usize,
}

#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub upload_dir: PathBuf,
    pub max_file_size_mb: u64,
    pub max_pages: usize,
    pub extraction_timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct S3Settings {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub region: String,
}

#[derive(Debug, Clone)]
pub struct RubricSettings {
    pub seed_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub concurrency: usize,
    pub poll_interval_seconds: u64,
    pub stale_recovery_interval_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct TelemetrySettings {
    pub log_level: String,
    pub json: bool,
    pub prometheus_enabled: bool,
    pub prometheus_addr: SocketAddr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Staging,
    Test,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
            Environment::Staging => "staging",
            Environment::Test => "test",
        }
    }

    fn is_production(self) -> bool {
        matches!(self, Environment::Production)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
    #[error("TOKEN_CAP ({cap}) must not exceed TOKEN_HARD_LIMIT ({hard_limit})")]
    BudgetInverted { cap: usize, hard_limit: usize },
    #[error("missing required secret for {0}")]
    MissingSecret(&'static str),
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let environment =
            parse_environment(env_optional("GRADER_ENV").or_else(|| env_optional("ENVIRONMENT")));
        let strict_config =
            env_optional("GRADER_STRICT_CONFIG").map(|value| parse_bool(&value)).unwrap_or(false)
                || environment.is_production();

        let postgres_server = env_or_default("POSTGRES_SERVER", "localhost");
        let postgres_port = parse_u16("POSTGRES_PORT", env_or_default("POSTGRES_PORT", "5432"))?;
        let postgres_user = env_or_default("POSTGRES_USER", "grader");
        let postgres_password = env_or_default("POSTGRES_PASSWORD", "");
        let postgres_db = env_or_default("POSTGRES_DB", "rubric_grader");
        let database_url = env_optional("DATABASE_URL");

        let openai_api_key = env_or_default("OPENAI_API_KEY", "");
        let openai_base_url = env_or_default("OPENAI_BASE_URL", "https://api.openai.com/v1");
        let grading_model = env_or_default("GRADING_MODEL", "gpt-4o-mini");
        let vision_model = env_or_default("VISION_MODEL", "gpt-4o-mini");
        let max_tokens = parse_u32("AI_MAX_TOKENS", env_or_default("AI_MAX_TOKENS", "4096"))?;
        let grading_temperature =
            parse_temperature("GRADING_TEMPERATURE", env_or_default("GRADING_TEMPERATURE", "0.2"))?;
        let vision_temperature =
            parse_temperature("VISION_TEMPERATURE", env_or_default("VISION_TEMPERATURE", "0.1"))?;
        let request_timeout_seconds =
            parse_seconds("AI_REQUEST_TIMEOUT", env_or_default("AI_REQUEST_TIMEOUT", "20"))?;
        let vision_timeout_seconds =
            parse_seconds("VISION_TIMEOUT", env_or_default("VISION_TIMEOUT", "15"))?;
        let vision_enabled =
            env_optional("VISION_ENABLED").map(|value| parse_bool(&value)).unwrap_or(true);

        let token_cap = parse_usize("TOKEN_CAP", env_or_default("TOKEN_CAP", "25000"))?;
        let token_hard_limit =
            parse_usize("TOKEN_HARD_LIMIT", env_or_default("TOKEN_HARD_LIMIT", "30000"))?;

        let upload_dir = PathBuf::from(env_or_default("UPLOAD_DIR", "./uploads"));
        let max_file_size_mb =
            parse_u64("MAX_FILE_SIZE_MB", env_or_default("MAX_FILE_SIZE_MB", "15"))?;
        let max_pages = parse_usize("MAX_PAGES", env_or_default("MAX_PAGES", "25"))?;
        let extraction_timeout_seconds =
            parse_seconds("EXTRACTION_TIMEOUT", env_or_default("EXTRACTION_TIMEOUT", "10"))?;

        let s3_endpoint = env_or_default("S3_ENDPOINT", "https://s3.amazonaws.com");
        let s3_access_key = env_or_default("S3_ACCESS_KEY", "");
        let s3_secret_key = env_or_default("S3_SECRET_KEY", "");
        let s3_bucket = env_or_default("S3_BUCKET", "rubric-grader-uploads");
        let s3_region = env_or_default("S3_REGION", "us-east-1");

        let seed_dir = env_optional("RUBRICS_DIR").map(PathBuf::from);

        let concurrency =
            parse_usize("WORKER_CONCURRENCY", env_or_default("WORKER_CONCURRENCY", "3"))?;
        let poll_interval_seconds =
            parse_seconds("WORKER_POLL_INTERVAL", env_or_default("WORKER_POLL_INTERVAL", "2"))?;
        let stale_recovery_interval_seconds = parse_seconds(
            "STALE_RECOVERY_INTERVAL",
            env_or_default("STALE_RECOVERY_INTERVAL", "60"),
        )?;

        let log_level = env_or_default("GRADER_LOG_LEVEL", "info");
        let json = env_optional("GRADER_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_addr = parse_addr("PROMETHEUS_ADDR", env_or_default("PROMETHEUS_ADDR", "0.0.0.0:9000"))?;

        let settings = Self {
            runtime: RuntimeSettings { environment, strict_config },
            database: DatabaseSettings {
                postgres_server,
                postgres_port,
                postgres_user,
                postgres_password,
                postgres_db,
                database_url,
            },
            ai: AiSettings {
                openai_api_key,
                openai_base_url,
                grading_model,
                vision_model,
                max_tokens,
                grading_temperature,
                vision_temperature,
                request_timeout_seconds,
                vision_timeout_seconds,
                vision_enabled,
            },
            budget: BudgetSettings { token_cap, token_hard_limit },
            uploads: UploadSettings {
                upload_dir,
                max_file_size_mb,
                max_pages,
                extraction_timeout_seconds,
            },
            s3: S3Settings {
                endpoint: s3_endpoint,
                access_key: s3_access_key,
                secret_key: s3_secret_key,
                bucket: s3_bucket,
                region: s3_region,
            },
            rubrics: RubricSettings { seed_dir },
            worker: WorkerSettings {
                concurrency,
                poll_interval_seconds,
                stale_recovery_interval_seconds,
            },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled, prometheus_addr },
        };

        settings.validate()?;

        Ok(settings)
    }

    pub fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    pub fn database(&self) -> &DatabaseSettings {
        &self.database
    }

    pub fn ai(&self) -> &AiSettings {
        &self.ai
    }

    pub fn budget(&self) -> &BudgetSettings {
        &self.budget
    }

    pub fn uploads(&self) -> &UploadSettings {
        &self.uploads
    }

    pub fn s3(&self) -> &S3Settings {
        &self.s3
    }

    pub fn rubrics(&self) -> &RubricSettings {
        &self.rubrics
    }

    pub fn worker(&self) -> &WorkerSettings {
        &self.worker
    }

    pub fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    /// Upper bound on how long one claimed job may legitimately stay in
    /// `processing`: extraction, two grading attempts, the vision pass, plus
    /// a fixed margin for storage round trips.
    pub fn stale_processing_after(&self) -> Duration {
        let seconds = self
            .uploads
            .extraction_timeout_seconds
            .saturating_add(self.ai.request_timeout_seconds.saturating_mul(2))
            .saturating_add(self.ai.vision_timeout_seconds)
            .saturating_add(120);
        Duration::from_secs(seconds)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.budget.token_cap == 0 {
            return Err(ConfigError::InvalidValue {
                field: "TOKEN_CAP",
                value: self.budget.token_cap.to_string(),
            });
        }
        if self.budget.token_cap > self.budget.token_hard_limit {
            return Err(ConfigError::BudgetInverted {
                cap: self.budget.token_cap,
                hard_limit: self.budget.token_hard_limit,
            });
        }
        if self.worker.concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "WORKER_CONCURRENCY",
                value: String::from("0"),
            });
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if self.database.database_url.is_none() && self.database.postgres_password.is_empty() {
            return Err(ConfigError::MissingSecret("POSTGRES_PASSWORD"));
        }

        if self.ai.openai_api_key.is_empty() {
            return Err(ConfigError::MissingSecret("OPENAI_API_KEY"));
        }

        Ok(())
    }
}

impl DatabaseSettings {
    pub fn database_url(&self) -> String {
        if let Some(url) = &self.database_url {
            return url.clone();
        }
        format!(
            "postgresql://{}:{}@{}:{}/{}",
            self.postgres_user,
            self.postgres_password,
            self.postgres_server,
            self.postgres_port,
            self.postgres_db
        )
    }
}

impl AiSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn vision_timeout(&self) -> Duration {
        Duration::from_secs(self.vision_timeout_seconds)
    }
}

impl UploadSettings {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }

    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction_timeout_seconds)
    }
}

impl S3Settings {
    pub fn is_configured(&self) -> bool {
        !self.access_key.is_empty() && !self.secret_key.is_empty()
    }
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

fn env_or_default(key: &str, default: &str) -> String {
    env_optional(key).unwrap_or_else(|| default.to_string())
}

fn parse_u16(field: &'static str, value: String) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidValue { field, value })
}

fn parse_u32(field: &'static str, value: String) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidValue { field, value })
}

fn parse_u64(field: &'static str, value: String) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidValue { field, value })
}

fn parse_usize(field: &'static str, value: String) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidValue { field, value })
}

/// Zero-second timeouts would fail every call, so they are rejected here.
fn parse_seconds(field: &'static str, value: String) -> Result<u64, ConfigError> {
    match value.parse::<u64>() {
        Ok(seconds) if seconds > 0 => Ok(seconds),
        _ => Err(ConfigError::InvalidValue { field, value }),
    }
}

fn parse_temperature(field: &'static str, value: String) -> Result<f64, ConfigError> {
    match value.parse::<f64>() {
        Ok(parsed) if (0.0..=2.0).contains(&parsed) => Ok(parsed),
        _ => Err(ConfigError::InvalidValue { field, value }),
    }
}

fn parse_addr(field: &'static str, value: String) -> Result<SocketAddr, ConfigError> {
    value.parse::<SocketAddr>().map_err(|_| ConfigError::InvalidValue { field, value })
}

fn parse_bool(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "yes" | "YES" | "on" | "ON")
}

fn parse_environment(value: Option<String>) -> Environment {
    match value.as_deref().map(|val| val.to_lowercase()) {
        Some(ref val) if val == "production" || val == "prod" => Environment::Production,
        Some(ref val) if val == "staging" => Environment::Staging,
        Some(ref val) if val == "test" || val == "testing" => Environment::Test,
        _ => Environment::Development,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bool_variants() {
        assert!(parse_bool("1"));
        assert!(parse_bool("true"));
        assert!(parse_bool("YES"));
        assert!(parse_bool("on"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool("0"));
    }

    #[test]
    fn parse_environment_variants() {
        assert_eq!(parse_environment(Some("prod".to_string())), Environment::Production);
        assert_eq!(parse_environment(Some("Staging".to_string())), Environment::Staging);
        assert_eq!(parse_environment(Some("testing".to_string())), Environment::Test);
        assert_eq!(parse_environment(None), Environment::Development);
    }

    #[test]
    fn timeouts_must_be_positive() {
        assert_eq!(parse_seconds("AI_REQUEST_TIMEOUT", "20".to_string()).expect("valid"), 20);
        assert!(parse_seconds("AI_REQUEST_TIMEOUT", "0".to_string()).is_err());
        assert!(parse_seconds("AI_REQUEST_TIMEOUT", "soon".to_string()).is_err());
    }

    #[test]
    fn temperature_range_is_enforced() {
        assert!(parse_temperature("GRADING_TEMPERATURE", "0.2".to_string()).is_ok());
        assert!(parse_temperature("GRADING_TEMPERATURE", "2.5".to_string()).is_err());
        assert!(parse_temperature("GRADING_TEMPERATURE", "-1".to_string()).is_err());
    }

    #[test]
    fn database_url_prefers_explicit_value() {
        let mut database = DatabaseSettings {
            postgres_server: "db".to_string(),
            postgres_port: 5433,
            postgres_user: "grader".to_string(),
            postgres_password: "secret".to_string(),
            postgres_db: "grading".to_string(),
            database_url: None,
        };
        assert_eq!(database.database_url(), "postgresql://grader:secret@db:5433/grading");

        database.database_url = Some("postgresql://other/db".to_string());
        assert_eq!(database.database_url(), "postgresql://other/db");
    }
}
