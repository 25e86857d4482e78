use anyhow::Result;
use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format as _, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

/// Browser front end for the emberchain demos.
///
/// Model, index and tool settings come from the same config file and `EMBER_` variables as the CLI.
#[skip_serializing_none]
#[derive(Clone, Parser, Debug, Serialize, Deserialize)]
pub struct WebConfig {
    /// Print the effective configuration and exit
    #[arg(long, action=clap::ArgAction::SetTrue)]
    pub dump_config: Option<bool>,

    /// Address to bind
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(long)]
    pub port: Option<u16>,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            dump_config: Default::default(),
            host: Some("0.0.0.0".into()),
            port: Some(7860),
        }
    }
}

impl WebConfig {
    pub fn load() -> Result<Self> {
        Self::figment(WebConfig::parse())
    }

    pub fn figment(cli: WebConfig) -> Result<Self> {
        Ok(Figment::new()
            .merge(Serialized::defaults(WebConfig::default()))
            .merge(Toml::file(
                dirs::config_dir()
                    .map(|p| p.join("emberchain"))
                    .unwrap_or_default()
                    .join("config.toml"),
            ))
            .merge(Env::prefixed("EMBER_"))
            .merge(Serialized::defaults(cli))
            .select(std::env::var("EMBER_PROFILE").unwrap_or_default())
            .extract()?)
    }

    pub fn bind_addr(&self) -> String {
        format!(
            "{}:{}",
            self.host.as_deref().unwrap_or("0.0.0.0"),
            self.port.unwrap_or(7860)
        )
    }
}
