use std::{str::FromStr, time::Duration};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing {0} env var")]
    Missing(&'static str),
    #[error("{name} is not valid: {value:?}")]
    Invalid { name: &'static str, value: String },
    #[error("ping period ({ping:?}) must be shorter than pong wait ({pong:?})")]
    PingNotBeforePong { ping: Duration, pong: Duration },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Liveness and sizing knobs handed to every websocket connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub write_wait: Duration,
    pub pong_wait: Duration,
    pub ping_period: Duration,
    pub max_message_size: usize,
    pub send_queue_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let pong_wait = Duration::from_secs(60);
        Self {
            write_wait: Duration::from_secs(10),
            pong_wait,
            ping_period: pong_wait * 9 / 10,
            max_message_size: 10_000,
            send_queue_size: 256,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.write_wait.is_zero() {
            return Err(ConfigError::Zero("WS_WRITE_WAIT_SECS"));
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::Zero("WS_MAX_MESSAGE_SIZE"));
        }
        if self.send_queue_size == 0 {
            return Err(ConfigError::Zero("WS_SEND_QUEUE_SIZE"));
        }
        if self.ping_period.is_zero() || self.ping_period >= self.pong_wait {
            return Err(ConfigError::PingNotBeforePong {
                ping: self.ping_period,
                pong: self.pong_wait,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotQueueKind {
    Memory,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_ttl: Duration,
    pub bot_symbol: String,
    pub bot_queue: BotQueueKind,
    pub request_queue: String,
    pub response_queue: String,
    pub stock_api_url: String,
    pub history_limit: u32,
    pub log_level: String,
    pub log_format: LogFormat,
    pub client: ClientConfig,
}

impl Config {
    /// Reads `.env` (if present) and the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenv::dotenv();
        Self::from_lookup(|name| dotenv::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let jwt_secret = var("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;

        let bot_queue = match var("BOT_QUEUE").as_deref().unwrap_or("memory") {
            "memory" => BotQueueKind::Memory,
            "none" => BotQueueKind::None,
            other => {
                return Err(ConfigError::Invalid {
                    name: "BOT_QUEUE",
                    value: other.to_owned(),
                });
            }
        };

        let log_format = match var("LOG_FORMAT").as_deref().unwrap_or("json") {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            other => {
                return Err(ConfigError::Invalid {
                    name: "LOG_FORMAT",
                    value: other.to_owned(),
                });
            }
        };

        let pong_wait = Duration::from_secs(parse_or(&var, "WS_PONG_WAIT_SECS", 60)?);
        let ping_period = match var("WS_PING_PERIOD_SECS") {
            Some(value) => Duration::from_secs(parse("WS_PING_PERIOD_SECS", value)?),
            None => pong_wait * 9 / 10,
        };
        let client = ClientConfig {
            write_wait: Duration::from_secs(parse_or(&var, "WS_WRITE_WAIT_SECS", 10)?),
            pong_wait,
            ping_period,
            max_message_size: parse_or(&var, "WS_MAX_MESSAGE_SIZE", 10_000)?,
            send_queue_size: parse_or(&var, "WS_SEND_QUEUE_SIZE", 256)?,
        };
        client.validate()?;

        Ok(Config {
            port: parse_or(&var, "PORT", 8080)?,
            database_url: var("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://chatroom.db?mode=rwc".to_owned()),
            jwt_secret,
            jwt_ttl: Duration::from_secs(60 * parse_or(&var, "JWT_TTL_MINUTES", 3600)?),
            bot_symbol: var("BOT_SYMBOL").unwrap_or_else(|| "/".to_owned()),
            bot_queue,
            request_queue: var("REQUEST_QUEUE").unwrap_or_else(|| "command_queue".to_owned()),
            response_queue: var("RESPONSE_QUEUE").unwrap_or_else(|| "response_queue".to_owned()),
            stock_api_url: var("STOCK_API_URL").unwrap_or_else(|| "https://stooq.com".to_owned()),
            history_limit: parse_or(&var, "HISTORY_LIMIT", 50)?,
            log_level: var("RUST_LOG")
                .or_else(|| var("LOG_LEVEL"))
                .unwrap_or_else(|| "debug".to_owned()),
            log_format,
            client,
        })
    }
}

fn parse<T: FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { name, value })
}

fn parse_or<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match var(name) {
        Some(value) => parse(name, value),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[("JWT_SECRET", "s3cret")]).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.bot_symbol, "/");
        assert_eq!(config.bot_queue, BotQueueKind::Memory);
        assert_eq!(config.client, ClientConfig::default());
        assert_eq!(config.client.ping_period, Duration::from_secs(54));
        assert_eq!(config.history_limit, 50);
    }

    #[test]
    fn jwt_secret_is_required() {
        assert_eq!(config(&[]).unwrap_err(), ConfigError::Missing("JWT_SECRET"));
        assert_eq!(
            config(&[("JWT_SECRET", "  ")]).unwrap_err(),
            ConfigError::Missing("JWT_SECRET")
        );
    }

    #[test]
    fn empty_bot_symbol_falls_back() {
        let config = config(&[("JWT_SECRET", "x"), ("BOT_SYMBOL", "")]).unwrap();
        assert_eq!(config.bot_symbol, "/");
    }

    #[test]
    fn ping_must_be_shorter_than_pong() {
        let err = config(&[
            ("JWT_SECRET", "x"),
            ("WS_PONG_WAIT_SECS", "10"),
            ("WS_PING_PERIOD_SECS", "10"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::PingNotBeforePong { .. }));
    }

    #[test]
    fn ping_follows_custom_pong() {
        let config = config(&[("JWT_SECRET", "x"), ("WS_PONG_WAIT_SECS", "20")]).unwrap();
        assert_eq!(config.client.ping_period, Duration::from_secs(18));
    }

    #[test]
    fn rejects_garbage_numbers() {
        let err = config(&[("JWT_SECRET", "x"), ("PORT", "eighty")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                name: "PORT",
                value: "eighty".to_owned()
            }
        );
    }

    #[test]
    fn bot_queue_can_be_disabled() {
        let config = config(&[("JWT_SECRET", "x"), ("BOT_QUEUE", "none")]).unwrap();
        assert_eq!(config.bot_queue, BotQueueKind::None);
    }
}
