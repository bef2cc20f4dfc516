use std::fs;
use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
	pub relay: Relay,
	pub stun: Stun,
	#[serde(default = "default_token_path")]
	pub token_path: String,
	#[serde(default = "default_window")]
	pub window: u32,
}

#[derive(Debug, Deserialize)]
pub struct Relay {
	pub host: String,
	pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct Stun {
	pub url: String,
}

fn default_token_path() -> String {
	"token".to_owned()
}

fn default_window() -> u32 {
	transport::DEFAULT_WINDOW
}

impl Config {
	pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
		let text = fs::read_to_string(path)?;
		let config: Config = toml::from_str(&text)?;

		if config.window as usize > transport::RING_CAPACITY {
			return Err(format!("window {} exceeds the maximum of {}", config.window, transport::RING_CAPACITY).into());
		}

		Ok(config)
	}
}
