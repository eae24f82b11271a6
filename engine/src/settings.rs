// Copyright 2025 Chainflip Labs GmbH
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
//
// SPDX-License-Identifier: Apache-2.0

use std::{collections::HashMap, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, ConfigError, Environment, File, Source, Value};
use ethers::types::H160;
use serde::Deserialize;
use url::Url;

use crate::constants::{
	DEFAULT_CONFIG_PATH, DEFAULT_MAX_CONCURRENT_EVENTS, DEFAULT_MAX_CONCURRENT_SWEEPS,
	DEFAULT_TRANSACTION_TIMEOUT,
};

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Network {
	Polygon,
	Mumbai,
}

impl Network {
	pub fn chain_id(&self) -> u64 {
		match self {
			Network::Polygon => 137,
			Network::Mumbai => 80001,
		}
	}

	fn default_contracts(&self) -> Contracts {
		fn address(s: &str) -> H160 {
			H160::from_str(s).expect("hardcoded address is valid")
		}

		// The relayer, NFT and forwarder are deployed at the same address on both networks.
		let follow_relayer = address("0x5a84eC20F88e94dC3EB96cE77695997f8446a22D");
		let eligibility_nft = address("0xa7f21ff23D55f9f34B4F8c45E930333AA80f5E38");
		let cfa_forwarder = address("0xcfA132E353cB4E398080B9700609bb008eceB125");

		match self {
			Network::Polygon => Contracts {
				lens_hub: address("0xDb46d1Dc155634FbC732f92E853b10B288AD5a1d"),
				follow_relayer,
				eligibility_nft,
				cfa_forwarder,
				// USDCx
				super_token: address("0xCAa7349CEA390F89641fe306D93591f87595dc1F"),
			},
			Network::Mumbai => Contracts {
				lens_hub: address("0x60Ae865ee4C725cd04353b5AAb364553f56ceF82"),
				follow_relayer,
				eligibility_nft,
				cfa_forwarder,
				// fUSDCx
				super_token: address("0x42bb40bF79730451B11f6De1CbA222F17b87Afd7"),
			},
		}
	}
}

impl std::fmt::Display for Network {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Network::Polygon => write!(f, "polygon"),
			Network::Mumbai => write!(f, "mumbai"),
		}
	}
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Eth {
	pub ws_node_endpoint: String,
	pub http_node_endpoint: String,
	pub private_key_file: PathBuf,
}

impl Eth {
	pub fn validate_settings(&self) -> Result<(), ConfigError> {
		parse_websocket_endpoint(&self.ws_node_endpoint)?;
		parse_http_endpoint(&self.http_node_endpoint)?;
		Ok(())
	}
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Registry {
	pub api_endpoint: String,
}

/// Per-network overrides of the well known contract addresses.
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct ContractOverrides {
	pub lens_hub: Option<H160>,
	pub follow_relayer: Option<H160>,
	pub eligibility_nft: Option<H160>,
	pub cfa_forwarder: Option<H160>,
	pub super_token: Option<H160>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Contracts {
	/// Emits the Followed events.
	pub lens_hub: H160,
	/// Follows made through this account carry the real follower in the tx call data.
	pub follow_relayer: H160,
	pub eligibility_nft: H160,
	pub cfa_forwarder: H160,
	pub super_token: H160,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Flows {
	/// Fixed gas limit for flow transactions. The node estimates one if unset.
	#[serde(default)]
	pub gas_limit: Option<u64>,
	#[serde(default = "default_transaction_timeout_secs")]
	pub transaction_timeout_secs: u64,
	#[serde(default = "default_max_concurrent_events")]
	pub max_concurrent_events: usize,
	#[serde(default = "default_max_concurrent_sweeps")]
	pub max_concurrent_sweeps: usize,
}

impl Default for Flows {
	fn default() -> Self {
		Self {
			gas_limit: None,
			transaction_timeout_secs: default_transaction_timeout_secs(),
			max_concurrent_events: default_max_concurrent_events(),
			max_concurrent_sweeps: default_max_concurrent_sweeps(),
		}
	}
}

impl Flows {
	pub fn transaction_timeout(&self) -> Duration {
		Duration::from_secs(self.transaction_timeout_secs)
	}

	fn validate_settings(&self) -> Result<(), ConfigError> {
		if self.transaction_timeout_secs == 0 ||
			self.max_concurrent_events == 0 ||
			self.max_concurrent_sweeps == 0
		{
			return Err(ConfigError::Message(
				"flows.transaction_timeout_secs, flows.max_concurrent_events and \
				flows.max_concurrent_sweeps must be non-zero"
					.to_string(),
			))
		}
		Ok(())
	}
}

fn default_transaction_timeout_secs() -> u64 {
	DEFAULT_TRANSACTION_TIMEOUT.as_secs()
}

fn default_max_concurrent_events() -> usize {
	DEFAULT_MAX_CONCURRENT_EVENTS
}

fn default_max_concurrent_sweeps() -> usize {
	DEFAULT_MAX_CONCURRENT_SWEEPS
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct Logging {
	/// Append-only diagnostic log. Nothing is written to disk if unset.
	#[serde(default)]
	pub log_file: Option<PathBuf>,
	#[serde(default)]
	pub json: bool,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Settings {
	pub network: Network,
	pub eth: Eth,
	pub registry: Registry,
	#[serde(default)]
	pub contracts: ContractOverrides,
	#[serde(default)]
	pub flows: Flows,
	#[serde(default)]
	pub logging: Logging,
}

#[derive(Parser, Debug, Clone, Default)]
pub struct EthOptions {
	#[clap(long = "eth.ws_node_endpoint")]
	pub eth_ws_node_endpoint: Option<String>,
	#[clap(long = "eth.http_node_endpoint")]
	pub eth_http_node_endpoint: Option<String>,
	#[clap(long = "eth.private_key_file")]
	pub eth_private_key_file: Option<PathBuf>,
}

impl EthOptions {
	pub fn insert_all(&self, map: &mut HashMap<String, Value>) {
		insert_command_line_option(map, "eth.ws_node_endpoint", &self.eth_ws_node_endpoint);
		insert_command_line_option(map, "eth.http_node_endpoint", &self.eth_http_node_endpoint);
		insert_command_line_option_path(map, "eth.private_key_file", &self.eth_private_key_file);
	}
}

#[derive(Parser, Debug, Clone, Default)]
pub struct CommandLineOptions {
	#[clap(short = 'c', long = "config-path")]
	pub config_path: Option<String>,

	#[clap(long = "network", value_enum)]
	pub network: Option<Network>,

	#[clap(flatten)]
	pub eth_opts: EthOptions,

	#[clap(long = "registry.api_endpoint")]
	pub registry_api_endpoint: Option<String>,

	#[clap(long = "flows.gas_limit")]
	pub flows_gas_limit: Option<u64>,

	#[clap(long = "logging.log_file")]
	pub logging_log_file: Option<PathBuf>,
}

impl Source for CommandLineOptions {
	fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
		Box::new((*self).clone())
	}

	fn collect(&self) -> Result<config::Map<String, Value>, ConfigError> {
		let mut map: HashMap<String, Value> = HashMap::new();

		insert_command_line_option(&mut map, "network", &self.network.map(|n| n.to_string()));
		self.eth_opts.insert_all(&mut map);
		insert_command_line_option(&mut map, "registry.api_endpoint", &self.registry_api_endpoint);
		insert_command_line_option(&mut map, "flows.gas_limit", &self.flows_gas_limit);
		insert_command_line_option_path(&mut map, "logging.log_file", &self.logging_log_file);

		Ok(map)
	}
}

/// Inserts the option into the map, if it is set
fn insert_command_line_option<T>(map: &mut HashMap<String, Value>, key: &str, option: &Option<T>)
where
	T: Into<config::ValueKind> + Clone,
{
	if let Some(value) = option {
		map.insert(key.to_string(), Value::new(None, value.clone()));
	}
}

fn insert_command_line_option_path(
	map: &mut HashMap<String, Value>,
	key: &str,
	option: &Option<PathBuf>,
) {
	insert_command_line_option(
		map,
		key,
		&option.as_ref().map(|path| path.to_string_lossy().into_owned()),
	);
}

impl Settings {
	/// Settings loaded from the `config_path` in the `CommandLineOptions` (or
	/// "config/Default.toml" if none), with overridden values from the environment and then
	/// the `CommandLineOptions`.
	pub fn new(opts: CommandLineOptions) -> Result<Self, ConfigError> {
		let file = match &opts.config_path {
			Some(path) => File::with_name(path).required(true),
			None => File::with_name(DEFAULT_CONFIG_PATH).required(false),
		};
		Self::load_settings_from_all_sources(file, opts)
	}

	fn load_settings_from_all_sources(
		file: File<config::FileSourceFile, config::FileFormat>,
		opts: CommandLineOptions,
	) -> Result<Self, ConfigError> {
		let settings: Settings = Config::builder()
			.add_source(file)
			.add_source(Environment::default().separator("__"))
			.add_source(opts)
			.build()?
			.try_deserialize()?;

		settings.validate_settings()?;

		Ok(settings)
	}

	pub fn validate_settings(&self) -> Result<(), ConfigError> {
		self.eth.validate_settings()?;
		parse_http_endpoint(&self.registry.api_endpoint)?;
		self.flows.validate_settings()
	}

	/// The network's well known contract addresses with any configured overrides applied.
	pub fn contracts(&self) -> Contracts {
		let defaults = self.network.default_contracts();
		let overrides = &self.contracts;
		Contracts {
			lens_hub: overrides.lens_hub.unwrap_or(defaults.lens_hub),
			follow_relayer: overrides.follow_relayer.unwrap_or(defaults.follow_relayer),
			eligibility_nft: overrides.eligibility_nft.unwrap_or(defaults.eligibility_nft),
			cfa_forwarder: overrides.cfa_forwarder.unwrap_or(defaults.cfa_forwarder),
			super_token: overrides.super_token.unwrap_or(defaults.super_token),
		}
	}

	#[cfg(test)]
	pub fn new_test() -> Result<Self, ConfigError> {
		Self::new(CommandLineOptions {
			config_path: Some("config/Testing.toml".to_string()),
			..Default::default()
		})
	}
}

fn parse_endpoint(endpoint: &str, schemes: &[&str]) -> Result<Url, ConfigError> {
	let url = Url::parse(endpoint)
		.map_err(|e| ConfigError::Message(format!("Invalid endpoint {endpoint}: {e}")))?;
	if !schemes.contains(&url.scheme()) {
		return Err(ConfigError::Message(format!(
			"Endpoint {endpoint} has scheme {}, expected one of {schemes:?}",
			url.scheme()
		)))
	}
	if url.host().is_none() || url.cannot_be_a_base() {
		return Err(ConfigError::Message(format!("Endpoint {endpoint} has no host")))
	}
	Ok(url)
}

/// Parse the URL and check that it is a valid websocket url
pub fn parse_websocket_endpoint(endpoint: &str) -> Result<Url, ConfigError> {
	parse_endpoint(endpoint, &["ws", "wss"])
}

pub fn parse_http_endpoint(endpoint: &str) -> Result<Url, ConfigError> {
	parse_endpoint(endpoint, &["http", "https"])
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	const TEST_CONFIG: &str = r#"
network = "mumbai"

[eth]
ws_node_endpoint = "wss://polygon-mumbai.example/v2/key"
http_node_endpoint = "https://polygon-mumbai.example/v2/key"
private_key_file = "./keys/eth_private_key"

[registry]
api_endpoint = "http://localhost:3000"

[contracts]
super_token = "0x0000000000000000000000000000000000000042"

[flows]
gas_limit = 9000000
"#;

	fn write_config(contents: &str) -> tempfile::NamedTempFile {
		let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
		file.write_all(contents.as_bytes()).unwrap();
		file
	}

	fn opts_for(file: &tempfile::NamedTempFile) -> CommandLineOptions {
		CommandLineOptions {
			config_path: Some(file.path().to_string_lossy().into_owned()),
			..Default::default()
		}
	}

	#[test]
	fn loads_file_with_defaults() {
		let file = write_config(TEST_CONFIG);
		let settings = Settings::new(opts_for(&file)).unwrap();

		assert_eq!(settings.network, Network::Mumbai);
		assert_eq!(settings.network.chain_id(), 80001);
		assert_eq!(settings.registry.api_endpoint, "http://localhost:3000");
		assert_eq!(settings.flows.gas_limit, Some(9_000_000));
		assert_eq!(settings.flows.transaction_timeout(), DEFAULT_TRANSACTION_TIMEOUT);
		assert_eq!(settings.flows.max_concurrent_events, DEFAULT_MAX_CONCURRENT_EVENTS);
		assert_eq!(settings.logging, Logging::default());
	}

	#[test]
	fn contract_overrides_replace_network_defaults() {
		let file = write_config(TEST_CONFIG);
		let settings = Settings::new(opts_for(&file)).unwrap();
		let contracts = settings.contracts();

		assert_eq!(contracts.super_token, H160::from_low_u64_be(0x42));
		assert_eq!(contracts.lens_hub, Network::Mumbai.default_contracts().lens_hub);
		assert_ne!(
			Network::Mumbai.default_contracts().lens_hub,
			Network::Polygon.default_contracts().lens_hub
		);
	}

	#[test]
	fn command_line_options_override_the_file() {
		let file = write_config(TEST_CONFIG);
		let opts = CommandLineOptions {
			network: Some(Network::Polygon),
			eth_opts: EthOptions {
				eth_ws_node_endpoint: Some("ws://endpoint:1234".to_owned()),
				eth_http_node_endpoint: Some("http://endpoint:4321".to_owned()),
				eth_private_key_file: Some(PathBuf::from("eth_key_file")),
			},
			registry_api_endpoint: Some("https://registry.example".to_owned()),
			flows_gas_limit: Some(1_000_000),
			logging_log_file: Some(PathBuf::from("logs.txt")),
			..opts_for(&file)
		};

		let settings = Settings::new(opts.clone()).unwrap();

		assert_eq!(settings.network, Network::Polygon);
		assert_eq!(opts.eth_opts.eth_ws_node_endpoint.unwrap(), settings.eth.ws_node_endpoint);
		assert_eq!(opts.eth_opts.eth_http_node_endpoint.unwrap(), settings.eth.http_node_endpoint);
		assert_eq!(opts.eth_opts.eth_private_key_file.unwrap(), settings.eth.private_key_file);
		assert_eq!(opts.registry_api_endpoint.unwrap(), settings.registry.api_endpoint);
		assert_eq!(settings.flows.gas_limit, Some(1_000_000));
		assert_eq!(settings.logging.log_file, Some(PathBuf::from("logs.txt")));
	}

	#[test]
	fn rejects_invalid_endpoints() {
		let file = write_config(&TEST_CONFIG.replace("wss://polygon-mumbai", "https://polygon-mumbai"));
		assert!(Settings::new(opts_for(&file)).is_err());

		let file = write_config(&TEST_CONFIG.replace("http://localhost:3000", "localhost"));
		assert!(Settings::new(opts_for(&file)).is_err());
	}

	#[test]
	fn rejects_zero_concurrency() {
		let file = write_config(&format!("{TEST_CONFIG}max_concurrent_events = 0\n"));
		assert!(Settings::new(opts_for(&file)).is_err());
	}

	#[test]
	fn missing_explicit_config_file_is_an_error() {
		let opts = CommandLineOptions {
			config_path: Some("this/does/not/exist.toml".to_string()),
			..Default::default()
		};
		assert!(Settings::new(opts).is_err());
	}

	#[test]
	fn test_endpoint_parsing() {
		assert!(parse_websocket_endpoint("wss://network.my_eth_node:80/d2er2easdfasdfasdf2e").is_ok());
		assert!(parse_websocket_endpoint("ws://network.my_eth_node/<secret_key>").is_ok());
		assert!(parse_websocket_endpoint("https://mainnet.infura.io/v3/3afd67").is_err());
		assert!(parse_websocket_endpoint("").is_err());
		assert!(parse_http_endpoint("http://localhost:3000").is_ok());
		assert!(parse_http_endpoint("ws://localhost:3000").is_err());
	}
}
