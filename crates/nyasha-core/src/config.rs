use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{clock::TypingDelay, errors::Error, session::DEFAULT_RECONNECT_DELAY, Result};

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Typed configuration, read from the environment (and an optional `.env`).
#[derive(Clone, Debug)]
pub struct Config {
    // Language model
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub gemini_base_url: String,
    pub completion_timeout: Duration,

    // Messaging network
    pub telegram_bot_token: String,
    pub telegram_poll_timeout: Duration,
    pub auth_dir: PathBuf,
    pub reconnect_delay: Duration,

    // Persona / behavior
    pub persona_file: Option<PathBuf>,
    pub typing_delay: TypingDelay,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from any key lookup (the process env in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).and_then(non_empty);
        let get_u64 = |key: &str| get(key).and_then(|s| s.trim().parse::<u64>().ok());

        // Required
        let gemini_api_key = get("GEMINIAPIKEY")
            .or_else(|| get("GEMINI_API_KEY"))
            .ok_or_else(|| {
                Error::Config(
                    "GEMINIAPIKEY (or GEMINI_API_KEY) environment variable is required".to_string(),
                )
            })?;
        let telegram_bot_token = get("TELEGRAM_BOT_TOKEN").ok_or_else(|| {
            Error::Config("TELEGRAM_BOT_TOKEN environment variable is required".to_string())
        })?;

        // Model
        let gemini_model = get("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string());
        let gemini_base_url = get("GEMINI_BASE_URL")
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string());
        let completion_timeout =
            Duration::from_millis(get_u64("COMPLETION_TIMEOUT_MS").unwrap_or(60_000));

        // Session
        let telegram_poll_timeout =
            Duration::from_secs(get_u64("TELEGRAM_POLL_TIMEOUT_SECS").unwrap_or(10));
        let auth_dir = PathBuf::from(get("AUTH_DIR").unwrap_or_else(|| "auth_info".to_string()));
        let reconnect_delay = get_u64("RECONNECT_DELAY_MS")
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_RECONNECT_DELAY);

        // Persona / typing
        let persona_file = get("PERSONA_FILE").map(PathBuf::from);
        let defaults = TypingDelay::default();
        let typing_delay = TypingDelay {
            min: get_u64("TYPING_DELAY_MIN_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.min),
            max: get_u64("TYPING_DELAY_MAX_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.max),
        };
        if typing_delay.min > typing_delay.max {
            return Err(Error::Config(format!(
                "TYPING_DELAY_MIN_MS ({:?}) must not exceed TYPING_DELAY_MAX_MS ({:?})",
                typing_delay.min, typing_delay.max
            )));
        }

        Ok(Self {
            gemini_api_key,
            gemini_model,
            gemini_base_url,
            completion_timeout,
            telegram_bot_token,
            telegram_poll_timeout,
            auth_dir,
            reconnect_delay,
            persona_file,
            typing_delay,
        })
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn cfg(pairs: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn missing_api_key_is_config_error() {
        let err = cfg(&[("TELEGRAM_BOT_TOKEN", "t")]).unwrap_err();
        assert!(matches!(err, Error::Config(m) if m.contains("GEMINIAPIKEY")));

        let err = cfg(&[("GEMINIAPIKEY", "  "), ("TELEGRAM_BOT_TOKEN", "t")]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn missing_bot_token_is_config_error() {
        let err = cfg(&[("GEMINIAPIKEY", "k")]).unwrap_err();
        assert!(matches!(err, Error::Config(m) if m.contains("TELEGRAM_BOT_TOKEN")));
    }

    #[test]
    fn primary_key_name_wins() {
        let c = cfg(&[
            ("GEMINIAPIKEY", "primary"),
            ("GEMINI_API_KEY", "secondary"),
            ("TELEGRAM_BOT_TOKEN", "t"),
        ])
        .unwrap();
        assert_eq!(c.gemini_api_key, "primary");

        let c = cfg(&[("GEMINI_API_KEY", "secondary"), ("TELEGRAM_BOT_TOKEN", "t")]).unwrap();
        assert_eq!(c.gemini_api_key, "secondary");
    }

    #[test]
    fn defaults_apply() {
        let c = cfg(&[("GEMINIAPIKEY", "k"), ("TELEGRAM_BOT_TOKEN", "t")]).unwrap();
        assert_eq!(c.gemini_model, DEFAULT_GEMINI_MODEL);
        assert_eq!(c.gemini_base_url, DEFAULT_GEMINI_BASE_URL);
        assert_eq!(c.reconnect_delay, Duration::from_secs(5));
        assert_eq!(c.auth_dir, PathBuf::from("auth_info"));
        assert_eq!(c.typing_delay, TypingDelay::default());
        assert_eq!(c.telegram_poll_timeout, Duration::from_secs(10));
        assert!(c.persona_file.is_none());
    }

    #[test]
    fn overrides_are_parsed() {
        let c = cfg(&[
            ("GEMINIAPIKEY", "k"),
            ("TELEGRAM_BOT_TOKEN", "t"),
            ("GEMINI_MODEL", "gemini-2.5-flash"),
            ("GEMINI_BASE_URL", "http://localhost:8080/models/"),
            ("RECONNECT_DELAY_MS", "250"),
            ("TYPING_DELAY_MIN_MS", "100"),
            ("TYPING_DELAY_MAX_MS", "200"),
            ("AUTH_DIR", "/var/lib/nyasha"),
        ])
        .unwrap();
        assert_eq!(c.gemini_model, "gemini-2.5-flash");
        assert_eq!(c.gemini_base_url, "http://localhost:8080/models");
        assert_eq!(c.reconnect_delay, Duration::from_millis(250));
        assert_eq!(c.typing_delay.min, Duration::from_millis(100));
        assert_eq!(c.typing_delay.max, Duration::from_millis(200));
        assert_eq!(c.auth_dir, PathBuf::from("/var/lib/nyasha"));
    }

    #[test]
    fn inverted_typing_range_is_rejected() {
        let err = cfg(&[
            ("GEMINIAPIKEY", "k"),
            ("TELEGRAM_BOT_TOKEN", "t"),
            ("TYPING_DELAY_MIN_MS", "900"),
            ("TYPING_DELAY_MAX_MS", "100"),
        ])
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn dotenv_parsing() {
        let parsed = parse_dotenv(
            "# comment\nGEMINIAPIKEY=\"abc\"\nexport AUTH_DIR='dir'\n\nBROKEN\n =x\nA = b \n",
        );
        assert_eq!(
            parsed,
            vec![
                ("GEMINIAPIKEY".to_string(), "abc".to_string()),
                ("AUTH_DIR".to_string(), "dir".to_string()),
                ("A".to_string(), "b".to_string()),
            ]
        );
    }
}
