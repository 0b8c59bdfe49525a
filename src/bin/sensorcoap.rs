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
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use dotenv::dotenv;
use sensorcoap::service::{parse_port, setup_tracing};
use sensorcoap::storage::{JsonFileStore, MemoryStore, SensorStore};
use sensorcoap::{AppResult, Server, ServerConfig};
use tokio::sync::broadcast;
use tokio::{runtime, signal};
use tracing::{error, info, warn};

const DEFAULT_CONFIG_FILE: &str = "conf.toml";

#[derive(Parser)]
#[command(version, about)]
pub struct CommandLine {
    /// UDP port to listen on (1-65535)
    pub port: Option<String>,
    /// log file path
    pub logfile: Option<PathBuf>,
    /// path to config file
    #[arg(short, long)]
    pub conf: Option<PathBuf>,
    /// keep readings in memory only, nothing is written to the data file
    #[arg(long)]
    pub ephemeral: bool,
    /// log level (v: info, vv: debug, vvv: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

fn main() -> AppResult<()> {
    dotenv().ok();
    let commandline = CommandLine::parse();

    // an explicit --conf must exist, the default one is optional
    let config_path = commandline.conf.clone().or_else(|| {
        let path = PathBuf::from(DEFAULT_CONFIG_FILE);
        path.exists().then_some(path)
    });
    let mut config = ServerConfig::set_up_config(config_path.as_ref())?;

    let (port, port_valid) = parse_port(commandline.port.as_deref(), config.network.port);
    config.network.port = port;
    if let Some(logfile) = &commandline.logfile {
        config.log.file = logfile.to_string_lossy().into_owned();
    }
    let level = match commandline.verbose {
        0 => config.log.level.clone(),
        1 => "info".to_string(),
        2 => "debug".to_string(),
        _ => "trace".to_string(),
    };

    let _log_guard = setup_tracing(Path::new(&config.log.file), &level)?;
    if !port_valid {
        warn!(
            "invalid port {:?}, falling back to {}",
            commandline.port.as_deref().unwrap_or_default(),
            port
        );
    }
    if let Some(path) = &config_path {
        info!("loaded config from {}", path.display());
    }

    let store: Arc<dyn SensorStore> = if commandline.ephemeral {
        info!("running with an in-memory store");
        Arc::new(MemoryStore::new())
    } else {
        match JsonFileStore::open(&config.storage.data_path) {
            Ok(store) => Arc::new(store),
            Err(err) => {
                error!(
                    "failed to open data file {}: {err}",
                    config.storage.data_path
                );
                return Err(err.into());
            }
        }
    };

    let rt = runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .enable_all()
        .build()?;
    let result = rt.block_on(run_server(config, store));
    if let Err(err) = &result {
        error!("server exited with error: {err}");
    }
    result
}

async fn run_server(config: ServerConfig, store: Arc<dyn SensorStore>) -> AppResult<()> {
    let (notify_shutdown, _) = broadcast::channel(1);
    let server = Server::bind(config, store).await?;

    tokio::select! {
        res = server.run(notify_shutdown.clone()) => res?,
        _ = signal::ctrl_c() => {
            info!("get shutdown signal");
        }
    }

    // stop the pool workers and the monitor
    let _ = notify_shutdown.send(());
    info!("server shutdown complete");
    Ok(())
}
