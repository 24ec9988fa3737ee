/*
 *  Copyright (C) 2025 Michael Bachmann
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU Affero General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU Affero General Public License for more details.
 *
 *  You should have received a copy of the GNU Affero General Public License
 *  along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use crate::{
    error::BridgeResult,
    session::config::{CodecConfig, DeviceConfig},
};
use clap::Parser;
use gethostname::gethostname;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about)]
pub struct Args {
    /// Path to config file
    #[arg(short, long, env = "RTP_AV_BRIDGE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub name: String,
    pub instance: InstanceConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "rtp-av-bridge".to_owned(),
            instance: InstanceConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstanceConfig {
    pub name: String,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            name: gethostname().to_string_lossy().to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub app: AppConfig,
    /// Tracing filter directives, e.g. `info,rtp_av_bridge=debug`.
    pub log_filter: Option<String>,
    /// Ask the OS for real-time scheduling on the media loop thread.
    pub realtime_media_loop: bool,
    pub devices: DeviceConfig,
    pub codecs: CodecConfig,
}

impl Config {
    /// Loads the config file named on the command line (or through
    /// `RTP_AV_BRIDGE_CONFIG`), falling back to the user config directory
    /// and then to built-in defaults.
    pub async fn load() -> BridgeResult<Config> {
        let args = Args::parse();
        let path = args.config.or_else(default_config_path);

        let Some(path) = path else {
            return Ok(Config::default());
        };
        if !fs::try_exists(&path).await.unwrap_or(false) {
            info!("No config file at {}, using defaults.", path.display());
            return Ok(Config::default());
        }

        let yaml = fs::read_to_string(&path).await?;
        Ok(serde_yaml::from_str(&yaml)?)
    }

    pub fn instance_name(&self) -> String {
        format!("{}-{}", self.app.name, self.app.instance.name)
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("rtp-av-bridge").join("config.yaml"))
}
