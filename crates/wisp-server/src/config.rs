use anyhow::{Context, Result};

const DEFAULT_MIME_TYPES: &str = "image/jpeg,image/png,image/gif,video/mp4,video/mpeg";

#[derive(Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: String,
    pub jwt_secret: String,
    pub media_endpoint: String,
    pub media_bucket: String,
    pub allowed_mime_types: Vec<String>,
    pub max_file_size: i64,
    pub presigned_url_ttl_secs: u64,
    pub worker_period_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            host: env_or("WISP_HOST", "0.0.0.0"),
            port: env_or("WISP_PORT", "8080")
                .parse()
                .context("invalid WISP_PORT")?,
            db_path: env_or("WISP_DB_PATH", "wisp.db"),
            jwt_secret: std::env::var("WISP_JWT_SECRET").unwrap_or_default(),
            media_endpoint: env_or("WISP_MEDIA_ENDPOINT", "http://localhost:9000"),
            media_bucket: env_or("WISP_MEDIA_BUCKET", "wisp-media"),
            allowed_mime_types: env_or("WISP_ALLOWED_MIME_TYPES", DEFAULT_MIME_TYPES)
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
            max_file_size: env_or("WISP_MAX_FILE_SIZE", "10485760")
                .parse()
                .context("invalid WISP_MAX_FILE_SIZE")?,
            presigned_url_ttl_secs: env_or("WISP_PRESIGNED_URL_TTL", "3600")
                .parse()
                .context("invalid WISP_PRESIGNED_URL_TTL")?,
            worker_period_secs: env_or("WISP_WORKER_PERIOD", "60")
                .parse()
                .context("invalid WISP_WORKER_PERIOD")?,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}
