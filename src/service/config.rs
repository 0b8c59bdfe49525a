// Copyright 2025 jonefeewang@gmail.com
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

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::{HEADER_SIZE, OPTION_URI_PATH};

use super::{AppError, AppResult};

pub const DEFAULT_PORT: u16 = 5683;
pub const DEFAULT_LOG_FILE: &str = "server.log";
pub const ENV_PREFIX: &str = "SENSORCOAP";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub ip: String,
    pub port: u16,
    /// Receive buffer size and the upper bound of an encoded response.
    pub max_datagram_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            ip: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            max_datagram_size: 1500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub max_options: usize,
    pub max_payload_size: usize,
    pub max_uri_length: usize,
    /// Option number carrying the routing id.
    pub path_id_option: u32,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        ProtocolConfig {
            max_options: 16,
            max_payload_size: 100,
            max_uri_length: 32,
            path_id_option: OPTION_URI_PATH,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    pub max_concurrent: usize,
    pub task_timeout_secs: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        AdmissionConfig {
            max_concurrent: 100,
            task_timeout_secs: 30,
        }
    }
}

impl AdmissionConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestHandlerPoolConfig {
    /// Capacity of the queue between the receive loop and the workers.
    pub channel_capacity: usize,
    pub num_workers: usize,
    pub monitor_interval_ms: u64,
    pub worker_check_timeout_ms: u64,
}

impl Default for RequestHandlerPoolConfig {
    fn default() -> Self {
        RequestHandlerPoolConfig {
            channel_capacity: 1024,
            num_workers: 100,
            monitor_interval_ms: 5000,
            worker_check_timeout_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            data_path: "data.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub file: String,
    /// Used when RUST_LOG is not set.
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            file: DEFAULT_LOG_FILE.to_string(),
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub enabled: bool,
    pub exchange_lifetime_secs: u64,
    pub max_entries: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        DedupConfig {
            enabled: false,
            exchange_lifetime_secs: 247,
            max_entries: 10_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub network: NetworkConfig,
    pub protocol: ProtocolConfig,
    pub admission: AdmissionConfig,
    pub request_handler_pool: RequestHandlerPoolConfig,
    pub storage: StorageConfig,
    pub log: LogConfig,
    pub dedup: DedupConfig,
}

impl ServerConfig {
    /// Loads the configuration: built-in defaults, then the optional TOML
    /// file, then `SENSORCOAP__SECTION__KEY` environment variables.
    pub fn set_up_config<P: AsRef<Path>>(path: Option<P>) -> AppResult<ServerConfig> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            let path_str = path.as_ref().to_str().ok_or(AppError::InvalidValue(format!(
                "config file path: {}",
                path.as_ref().to_string_lossy()
            )))?;
            builder = builder.add_source(config::File::with_name(path_str));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let server_config: ServerConfig = config.try_deserialize()?;
        server_config.validate()?;
        Ok(server_config)
    }

    pub fn from_toml_str(contents: &str) -> AppResult<ServerConfig> {
        let config = config::Config::builder()
            .add_source(config::File::from_str(contents, config::FileFormat::Toml))
            .build()?;
        let server_config: ServerConfig = config.try_deserialize()?;
        server_config.validate()?;
        Ok(server_config)
    }

    pub fn validate(&self) -> AppResult<()> {
        let mut errors = Vec::new();
        if self.network.max_datagram_size < HEADER_SIZE {
            errors.push(format!(
                "network.max_datagram_size must be at least {HEADER_SIZE}"
            ));
        }
        if self.protocol.max_uri_length == 0 {
            errors.push("protocol.max_uri_length must be greater than 0".to_string());
        }
        if self.admission.max_concurrent == 0 {
            errors.push("admission.max_concurrent must be greater than 0".to_string());
        }
        if self.request_handler_pool.num_workers == 0 {
            errors.push("request_handler_pool.num_workers must be greater than 0".to_string());
        }
        if self.request_handler_pool.channel_capacity == 0 {
            errors.push(
                "request_handler_pool.channel_capacity must be greater than 0".to_string(),
            );
        }
        if self.dedup.enabled && self.dedup.max_entries == 0 {
            errors.push("dedup.max_entries must be greater than 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::InvalidConfig(errors.join("; ")))
        }
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.network.ip, self.network.port)
    }
}

/// Port from the command line: an integer in 1..=65535, anything else falls
/// back to `default`.
pub fn parse_port(arg: Option<&str>, default: u16) -> (u16, bool) {
    match arg.map(|s| s.trim().parse::<u16>()) {
        Some(Ok(port)) if port > 0 => (port, true),
        Some(_) => (default, false),
        None => (default, true),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.network.port, 5683);
        assert_eq!(config.network.max_datagram_size, 1500);
        assert_eq!(config.protocol.max_options, 16);
        assert_eq!(config.protocol.path_id_option, 11);
        assert_eq!(config.admission.max_concurrent, 100);
        assert_eq!(config.admission.task_timeout(), Duration::from_secs(30));
        assert_eq!(config.log.file, "server.log");
        assert!(!config.dedup.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ServerConfig::from_toml_str(
            r#"
            [network]
            port = 6000

            [admission]
            max_concurrent = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.network.port, 6000);
        assert_eq!(config.network.ip, "0.0.0.0");
        assert_eq!(config.admission.max_concurrent, 4);
        assert_eq!(config.admission.task_timeout_secs, 30);
        assert_eq!(config.storage.data_path, "data.json");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let result = ServerConfig::from_toml_str(
            r#"
            [admission]
            max_concurrent = 0
            "#,
        );
        assert!(matches!(result, Err(AppError::InvalidConfig(_))));
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("conf.toml");
        std::fs::write(&path, "[storage]\ndata_path = \"/tmp/readings.json\"\n").unwrap();

        let config = ServerConfig::set_up_config(Some(&path)).unwrap();
        assert_eq!(config.storage.data_path, "/tmp/readings.json");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("absent.toml");
        assert!(ServerConfig::set_up_config(Some(&path)).is_err());
    }

    #[rstest]
    #[case(None, 5683, true)]
    #[case(Some("8080"), 8080, true)]
    #[case(Some("65535"), 65535, true)]
    #[case(Some("0"), 5683, false)]
    #[case(Some("65536"), 5683, false)]
    #[case(Some("-1"), 5683, false)]
    #[case(Some("coap"), 5683, false)]
    fn test_parse_port(#[case] arg: Option<&str>, #[case] port: u16, #[case] valid: bool) {
        assert_eq!(parse_port(arg, DEFAULT_PORT), (port, valid));
    }
}
