use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "taskdesk-api")]
#[command(about = "Taskdesk - runs natural-language file tasks against a working directory")]
pub struct ServiceConfig {
    /// Address to bind the HTTP server to
    #[arg(long, env = "TASKDESK_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to bind the HTTP server to
    #[arg(long, env = "TASKDESK_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Working directory every handler reads from and writes to
    #[arg(long, env = "TASKDESK_DATA_DIR", default_value = "/app/data")]
    pub data_dir: PathBuf,

    /// Path prefix accepted by the read endpoint; maps onto the data dir
    #[arg(long, env = "TASKDESK_PUBLIC_PREFIX", default_value = "/data/")]
    pub public_prefix: String,

    /// Directory for rolling service logs
    #[arg(long, env = "TASKDESK_LOG_DIR", default_value = "/app/logs")]
    pub log_dir: PathBuf,

    /// Base URL of the OpenAI-compatible inference API
    #[arg(
        long,
        env = "TASKDESK_INFERENCE_URL",
        default_value = "https://aiproxy.sanand.workers.dev/openai/v1"
    )]
    pub inference_url: String,

    /// Bearer token for the inference API
    #[arg(long, env = "TASKDESK_INFERENCE_API_KEY", hide_env_values = true)]
    pub inference_api_key: Option<String>,

    /// Chat model used for classification, extraction and code generation
    #[arg(long, env = "TASKDESK_INFERENCE_MODEL", default_value = "gpt-4o-mini")]
    pub inference_model: String,

    /// Model used for audio transcription
    #[arg(long, env = "TASKDESK_TRANSCRIPTION_MODEL", default_value = "whisper-1")]
    pub transcription_model: String,

    #[arg(long, env = "TASKDESK_INFERENCE_TIMEOUT_SECS", default_value_t = 60)]
    pub inference_timeout_secs: u64,

    #[arg(long, env = "TASKDESK_PROCESS_TIMEOUT_SECS", default_value_t = 120)]
    pub process_timeout_secs: u64,

    /// Email passed to the datagen bootstrap when the task omits one
    #[arg(long, env = "TASKDESK_USER_EMAIL")]
    pub user_email: Option<String>,

    /// Hand unclassified tasks to the code-generation loop instead of rejecting them
    #[arg(
        long,
        env = "TASKDESK_CODEGEN_FALLBACK",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub codegen_fallback: bool,
}

impl ServiceConfig {
    /// Loads `.env` (if any) and then parses flags with environment fallbacks.
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let mut config = Self::parse();
        if config.inference_api_key.is_none() {
            config.inference_api_key = std::env::var("AIPROXY_TOKEN")
                .ok()
                .filter(|v| !v.trim().is_empty());
        }
        config.normalize()?;
        Ok(config)
    }

    pub fn normalize(&mut self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(anyhow!("Data directory must not be empty"));
        }

        let prefix = self.public_prefix.trim();
        if !prefix.starts_with('/') {
            return Err(anyhow!(
                "Public prefix '{}' must be an absolute path",
                self.public_prefix
            ));
        }
        self.public_prefix = if prefix.ends_with('/') {
            prefix.to_string()
        } else {
            format!("{prefix}/")
        };

        self.inference_url = self.inference_url.trim().trim_end_matches('/').to_string();
        if self.inference_url.is_empty() {
            return Err(anyhow!("Inference URL must not be empty"));
        }

        if self.inference_timeout_secs == 0 || self.process_timeout_secs == 0 {
            return Err(anyhow!("Timeouts must be at least one second"));
        }

        self.user_email = self
            .user_email
            .take()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        Ok(())
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.inference_timeout_secs)
    }

    pub fn process_timeout(&self) -> Duration {
        Duration::from_secs(self.process_timeout_secs)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> ServiceConfig {
        let mut argv = vec!["taskdesk-api"];
        argv.extend_from_slice(args);
        ServiceConfig::try_parse_from(argv).unwrap()
    }

    #[test]
    fn normalize_appends_trailing_slash_to_prefix() {
        let mut config = parse(&["--public-prefix", "/data", "--inference-url", "http://llm/v1/"]);
        config.normalize().unwrap();
        assert_eq!(config.public_prefix, "/data/");
        assert_eq!(config.inference_url, "http://llm/v1");
    }

    #[test]
    fn normalize_rejects_relative_prefix() {
        let mut config = parse(&["--public-prefix", "data/"]);
        assert!(config.normalize().is_err());
    }

    #[test]
    fn normalize_rejects_zero_timeout() {
        let mut config = parse(&["--process-timeout-secs", "0"]);
        assert!(config.normalize().is_err());
    }

    #[test]
    fn codegen_fallback_can_be_disabled() {
        let config = parse(&["--codegen-fallback", "false"]);
        assert!(!config.codegen_fallback);
    }
}
