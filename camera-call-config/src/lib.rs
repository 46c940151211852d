//! Configuration management for camera call services
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use serde::Deserialize;
use std::env;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;

/// Transcoder process configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TranscoderConfig {
    /// Path (or name on `PATH`) of the ffmpeg binary
    pub ffmpeg_path: PathBuf,
}

/// Session tuning knobs
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Period of STUN keepalive bindings when the remote is not ICE-capable
    pub keepalive_interval_ms: u64,
    /// How many times an expired session may be refreshed during one start
    pub max_session_refreshes: u32,
    /// Address local media sockets bind to
    pub media_bind_address: IpAddr,
}

/// Inputs for the loopback harness
#[derive(Debug, Clone, Deserialize)]
pub struct HarnessConfig {
    /// JSON file holding the media description the harness answers with
    pub answer_file: Option<PathBuf>,
    /// JSON file holding the transcode spec (no transcoding when absent)
    pub transcode_file: Option<PathBuf>,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum LogFormat {
    Console,
    Json,
}

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CallConfig {
    pub transcoder: TranscoderConfig,
    pub session: SessionConfig,
    pub harness: HarnessConfig,
    pub log_level: Option<String>,
    pub log_format: LogFormat,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            transcoder: TranscoderConfig {
                ffmpeg_path: PathBuf::from("ffmpeg"),
            },
            session: SessionConfig {
                keepalive_interval_ms: 500,
                max_session_refreshes: 3,
                media_bind_address: IpAddr::from([0, 0, 0, 0]),
            },
            harness: HarnessConfig {
                answer_file: None,
                transcode_file: None,
            },
            log_level: Some("info".to_string()),
            log_format: LogFormat::Console,
        }
    }
}

impl CallConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let defaults = Self::default();

        let ffmpeg_path = env::var("FFMPEG_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.transcoder.ffmpeg_path);

        let keepalive_interval_ms = parse_var("KEEPALIVE_INTERVAL_MS")?
            .unwrap_or(defaults.session.keepalive_interval_ms);
        if keepalive_interval_ms == 0 {
            return Err(config::ConfigError::Message(
                "KEEPALIVE_INTERVAL_MS must be greater than zero".to_string(),
            ));
        }

        let max_session_refreshes = parse_var("MAX_SESSION_REFRESHES")?
            .unwrap_or(defaults.session.max_session_refreshes);

        let media_bind_address = parse_var("MEDIA_BIND_ADDRESS")?
            .unwrap_or(defaults.session.media_bind_address);

        let log_level = env::var("LOG_LEVEL")
            .unwrap_or_else(|_| "info".to_string());

        let log_format = match env::var("LOG_FORMAT").ok().as_deref() {
            Some("json") => LogFormat::Json,
            Some("console") | None => LogFormat::Console,
            Some(other) => {
                return Err(config::ConfigError::Message(format!(
                    "Unknown LOG_FORMAT: {}",
                    other
                )))
            }
        };

        Ok(Self {
            transcoder: TranscoderConfig { ffmpeg_path },
            session: SessionConfig {
                keepalive_interval_ms,
                max_session_refreshes,
                media_bind_address,
            },
            harness: HarnessConfig {
                answer_file: env::var("CALL_ANSWER_FILE").ok().map(PathBuf::from),
                transcode_file: env::var("CALL_TRANSCODE_FILE").ok().map(PathBuf::from),
            },
            log_level: Some(log_level),
            log_format,
        })
    }

    /// Get log level, defaulting to "info"
    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }
}

fn parse_var<T>(name: &str) -> Result<Option<T>, config::ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| config::ConfigError::Message(format!("Invalid {}: {}", name, e))),
        Err(_) => Ok(None),
    }
}
