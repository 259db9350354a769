use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

/// Server configuration, read from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    pub static_dir: PathBuf,
    pub default_language: String,
    pub max_text_chars: usize,
    pub max_upload_bytes: usize,
    pub models: ModelSettings,
}

/// Where to find the models and how to run them.
#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub model_dir: PathBuf,
    pub fallback_model_dir: Option<PathBuf>,
    pub intra_threads: usize,
}

#[derive(thiserror::Error, Debug)]
#[error("Invalid value for {name}: {value:?}")]
pub struct ConfigError {
    pub name: &'static str,
    pub value: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            upload_dir: "uploads".into(),
            output_dir: "outputs".into(),
            static_dir: "static".into(),
            default_language: "tr".to_string(),
            max_text_chars: 10_000,
            max_upload_bytes: 25 * 1024 * 1024,
            models: ModelSettings {
                model_dir: "models/your_tts".into(),
                fallback_model_dir: Some("models/glow_tts_tr".into()),
                intra_threads: 4,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let string = |name: &str, default: String| lookup(name).unwrap_or(default);
        let path = |name: &str, default: PathBuf| lookup(name).map(PathBuf::from).unwrap_or(default);

        // Empty FALLBACK_MODEL_DIR disables the fallback
        let fallback_model_dir = match lookup("FALLBACK_MODEL_DIR") {
            Some(dir) if dir.trim().is_empty() => None,
            Some(dir) => Some(PathBuf::from(dir)),
            None => defaults.models.fallback_model_dir,
        };

        Ok(Self {
            host: string("HOST", defaults.host),
            port: parse(&lookup, "PORT", defaults.port)?,
            upload_dir: path("UPLOAD_DIR", defaults.upload_dir),
            output_dir: path("OUTPUT_DIR", defaults.output_dir),
            static_dir: path("STATIC_DIR", defaults.static_dir),
            default_language: string("DEFAULT_LANGUAGE", defaults.default_language),
            max_text_chars: parse(&lookup, "MAX_TEXT_CHARS", defaults.max_text_chars)?,
            max_upload_bytes: parse(&lookup, "MAX_UPLOAD_BYTES", defaults.max_upload_bytes)?,
            models: ModelSettings {
                model_dir: path("MODEL_DIR", defaults.models.model_dir),
                fallback_model_dir,
                intra_threads: parse(&lookup, "ORT_INTRA_THREADS", defaults.models.intra_threads)?,
            },
        })
    }

    pub fn addr(&self) -> Result<SocketAddr, ConfigError> {
        let value = format!("{}:{}", self.host, self.port);
        value.parse().map_err(|_| ConfigError { name: "HOST", value })
    }
}

fn parse<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        Some(value) => value.trim().parse().map_err(|_| ConfigError { name, value }),
        None => Ok(default),
    }
}
