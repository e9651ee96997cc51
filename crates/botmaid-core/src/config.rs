use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{antiloop::FloodConfig, errors::Error, platform::PullConfig, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlatformKind {
    Telegram,
    Qq,
}

impl PlatformKind {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "telegram" | "tg" => Some(Self::Telegram),
            "qq" | "cqhttp" => Some(Self::Qq),
            _ => None,
        }
    }
}

/// One `BOTMAID_BOTS` entry.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    pub id: String,
    pub kind: PlatformKind,
    /// Telegram bot token.
    pub token: Option<String>,
    /// CQHTTP base URL.
    pub api_endpoint: Option<String>,
    pub access_token: Option<String>,
    pub masters: Vec<i64>,
}

/// Typed runtime configuration, read from the environment.
#[derive(Clone, Debug)]
pub struct Config {
    pub command_prefixes: Vec<String>,

    // Polling
    pub pull_limit: u32,
    pub pull_timeout: Duration,
    pub retry_interval: Duration,
    pub max_in_flight: usize,

    // Anti-reply-loop
    pub flood_threshold: usize,
    pub flood_window: Duration,

    pub store_file: Option<PathBuf>,
    pub words_file: Option<PathBuf>,
    pub subscription_topics: Vec<String>,
    pub log_messages: bool,

    pub connections: Vec<ConnectionConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            command_prefixes: vec!["/".to_string()],
            pull_limit: 100,
            pull_timeout: Duration::from_secs(60),
            retry_interval: Duration::from_secs(3),
            max_in_flight: 256,
            flood_threshold: 5,
            flood_window: Duration::from_secs(1),
            store_file: None,
            words_file: None,
            subscription_topics: Vec::new(),
            log_messages: true,
            connections: Vec::new(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::load_from(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the process environment in production).
    pub fn load_from(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let d = Self::default();
        let get = |key: &str| lookup(key).and_then(non_empty);

        let command_prefixes = parse_csv(get("BOTMAID_COMMAND_PREFIXES"));
        let command_prefixes = if command_prefixes.is_empty() {
            d.command_prefixes
        } else {
            command_prefixes
        };

        let pull_limit = parse_num(&get, "BOTMAID_PULL_LIMIT")?.unwrap_or(d.pull_limit);
        let pull_timeout = parse_num(&get, "BOTMAID_PULL_TIMEOUT")?
            .map(Duration::from_secs)
            .unwrap_or(d.pull_timeout);
        let retry_interval = parse_num(&get, "BOTMAID_RETRY_INTERVAL_MS")?
            .map(Duration::from_millis)
            .unwrap_or(d.retry_interval);
        let max_in_flight = parse_num(&get, "BOTMAID_MAX_IN_FLIGHT")?.unwrap_or(d.max_in_flight);

        let flood_threshold =
            parse_num(&get, "BOTMAID_FLOOD_THRESHOLD")?.unwrap_or(d.flood_threshold);
        if flood_threshold == 0 {
            return Err(Error::Config(
                "BOTMAID_FLOOD_THRESHOLD must be at least 1".to_string(),
            ));
        }
        let flood_window = parse_num(&get, "BOTMAID_FLOOD_WINDOW_MS")?
            .map(Duration::from_millis)
            .unwrap_or(d.flood_window);

        let store_file = get("BOTMAID_STORE_FILE").map(PathBuf::from);
        let words_file = get("BOTMAID_WORDS_FILE").map(PathBuf::from);
        let subscription_topics = parse_csv(get("BOTMAID_SUBSCRIPTION_TOPICS"));
        let log_messages = get("BOTMAID_LOG_MESSAGES")
            .map(|s| parse_bool(&s))
            .unwrap_or(d.log_messages);

        let ids = parse_csv(get("BOTMAID_BOTS"));
        if ids.is_empty() {
            return Err(Error::Config(
                "BOTMAID_BOTS environment variable is required".to_string(),
            ));
        }
        let mut connections = Vec::with_capacity(ids.len());
        for id in ids {
            connections.push(load_connection(&get, &id)?);
        }

        Ok(Self {
            command_prefixes,
            pull_limit,
            pull_timeout,
            retry_interval,
            max_in_flight,
            flood_threshold,
            flood_window,
            store_file,
            words_file,
            subscription_topics,
            log_messages,
            connections,
        })
    }

    pub fn pull_config(&self) -> PullConfig {
        PullConfig {
            limit: self.pull_limit,
            timeout: self.pull_timeout,
        }
    }

    pub fn flood_config(&self) -> FloodConfig {
        FloodConfig {
            threshold: self.flood_threshold,
            window: self.flood_window,
        }
    }
}

fn load_connection(get: &impl Fn(&str) -> Option<String>, id: &str) -> Result<ConnectionConfig> {
    let prefix = format!("BOTMAID_{}", env_segment(id));

    let raw_kind = get(&format!("{prefix}_TYPE"))
        .ok_or_else(|| Error::Config(format!("{prefix}_TYPE is required for bot {id}")))?;
    let kind = PlatformKind::parse(&raw_kind)
        .ok_or_else(|| Error::Config(format!("unknown type {raw_kind:?} for bot {id}")))?;

    let token = get(&format!("{prefix}_TOKEN"));
    let api_endpoint = get(&format!("{prefix}_API_ENDPOINT"));
    let access_token = get(&format!("{prefix}_ACCESS_TOKEN"));
    let masters = parse_csv_i64(get(&format!("{prefix}_MASTERS")));

    match kind {
        PlatformKind::Telegram if token.is_none() => {
            return Err(Error::Config(format!(
                "{prefix}_TOKEN is required for telegram bot {id}"
            )));
        }
        PlatformKind::Qq if api_endpoint.is_none() => {
            return Err(Error::Config(format!(
                "{prefix}_API_ENDPOINT is required for qq bot {id}"
            )));
        }
        _ => {}
    }

    Ok(ConnectionConfig {
        id: id.to_string(),
        kind,
        token,
        api_endpoint,
        access_token,
        masters,
    })
}

/// `my-bot` -> `MY_BOT`.
fn env_segment(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn parse_num<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    let Some(raw) = get(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|_| Error::Config(format!("{key} must be a number, got {raw:?}")))
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_csv(v: Option<String>) -> Vec<String> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
