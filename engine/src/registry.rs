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

//! Gateway to the registry API, the system of record for clients and for the followers that are
//! currently being streamed to.

use std::{fmt, str::FromStr};

use ethers::{
	types::{H160, U256},
	utils::{parse_units, to_checksum},
};
use reqwest::Client as HttpClient;
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
	constants::{REGISTRY_REQUEST_TIMEOUT, SUPER_TOKEN_DECIMALS},
	eth::redact_endpoint_secret,
	settings,
};

#[cfg(test)]
use mockall::automock;

/// A campaign streaming payments to the followers of one Lens profile.
/// An address spelled the way the registry stores it. The registry matches addresses as
/// strings, so the spelling it returned is the one sent back. Equality ignores the spelling.
#[derive(Debug, Clone)]
pub struct RegistryAddress {
	address: H160,
	raw: String,
}

impl RegistryAddress {
	pub fn address(&self) -> H160 {
		self.address
	}

	pub fn as_str(&self) -> &str {
		&self.raw
	}
}

/// Addresses that come from the chain are spelled checksummed.
impl From<H160> for RegistryAddress {
	fn from(address: H160) -> Self {
		Self { address, raw: to_checksum(&address, None) }
	}
}

impl FromStr for RegistryAddress {
	type Err = <H160 as FromStr>::Err;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let raw = s.trim();
		Ok(Self { address: H160::from_str(raw)?, raw: raw.to_string() })
	}
}

impl PartialEq for RegistryAddress {
	fn eq(&self, other: &Self) -> bool {
		self.address == other.address
	}
}

impl Eq for RegistryAddress {}

impl PartialEq<H160> for RegistryAddress {
	fn eq(&self, other: &H160) -> bool {
		self.address == *other
	}
}

impl fmt::Display for RegistryAddress {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.raw)
	}
}

impl Serialize for RegistryAddress {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&self.raw)
	}
}

impl<'de> Deserialize<'de> for RegistryAddress {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let raw = String::deserialize(deserializer)?;
		raw.parse().map_err(|e| D::Error::custom(format!("invalid address {raw}: {e}")))
	}
}

/// A campaign streaming payments to the followers of one Lens profile.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Client {
	#[serde(rename = "clientProfile", deserialize_with = "deserialize_profile_id")]
	pub client_profile_id: U256,
	#[serde(rename = "flowSenderAddress")]
	pub flow_sender_address: RegistryAddress,
	/// Monthly payment per follower, in base units of the super token.
	#[serde(rename = "amountFlowRate", deserialize_with = "deserialize_token_amount")]
	pub monthly_amount: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Follower {
	pub follower_address: RegistryAddress,
	pub flow_sender_address: RegistryAddress,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
	Number(serde_json::Number),
	String(String),
}

impl NumberOrString {
	fn into_string(self) -> String {
		match self {
			NumberOrString::Number(number) => number.to_string(),
			NumberOrString::String(string) => string.trim().to_string(),
		}
	}
}

/// Profile ids come back as `0x`-prefixed hex (`0x01a3`) or as decimal.
fn deserialize_profile_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
	let raw = NumberOrString::deserialize(deserializer)?.into_string();
	let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
		Some(hex) => U256::from_str_radix(hex, 16).ok(),
		None => U256::from_dec_str(&raw).ok(),
	};
	parsed.ok_or_else(|| D::Error::custom(format!("invalid profile id {raw}")))
}

/// Whole-token amounts (`30`, `"0.5"`), scaled to the super token's decimals.
fn deserialize_token_amount<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
	let raw = NumberOrString::deserialize(deserializer)?.into_string();
	parse_units(&raw, SUPER_TOKEN_DECIMALS)
		.map(Into::into)
		.map_err(|e| D::Error::custom(format!("invalid token amount {raw}: {e}")))
}

#[derive(Error, Debug)]
pub enum RegistryError {
	#[error("registry request {operation} failed: {source}")]
	Network {
		operation: &'static str,
		#[source]
		source: reqwest::Error,
	},
	#[error("registry returned a malformed response to {operation}: {source}")]
	Decode {
		operation: &'static str,
		#[source]
		source: reqwest::Error,
	},
}

impl RegistryError {
	fn from_reqwest(operation: &'static str, source: reqwest::Error) -> Self {
		if source.is_decode() {
			Self::Decode { operation, source }
		} else {
			Self::Network { operation, source }
		}
	}
}

#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait FollowerRegistryApi: Send + Sync + 'static {
	/// Clients whose record can't be read are logged and left out.
	async fn list_clients(&self) -> Result<Vec<Client>, RegistryError>;

	async fn list_followers(
		&self,
		flow_sender: RegistryAddress,
	) -> Result<Vec<Follower>, RegistryError>;

	async fn add_follower(
		&self,
		follower: RegistryAddress,
		flow_sender: RegistryAddress,
	) -> Result<(), RegistryError>;

	async fn remove_follower(
		&self,
		flow_sender: RegistryAddress,
		follower: RegistryAddress,
	) -> Result<(), RegistryError>;
}

#[derive(Clone)]
pub struct HttpFollowerRegistry {
	http_client: HttpClient,
	base_url: String,
}

impl HttpFollowerRegistry {
	pub fn new(registry_settings: &settings::Registry) -> anyhow::Result<Self> {
		settings::parse_http_endpoint(&registry_settings.api_endpoint)?;
		debug!(
			"Using follower registry at {}",
			redact_endpoint_secret(&registry_settings.api_endpoint)
		);
		Ok(Self {
			http_client: HttpClient::builder().timeout(REGISTRY_REQUEST_TIMEOUT).build()?,
			base_url: registry_settings.api_endpoint.trim_end_matches('/').to_string(),
		})
	}

	fn url(&self, path: &str) -> String {
		format!("{}/{path}", self.base_url)
	}

	async fn send(
		&self,
		operation: &'static str,
		request: reqwest::RequestBuilder,
	) -> Result<reqwest::Response, RegistryError> {
		request
			.send()
			.await
			.and_then(|response| response.error_for_status())
			.map_err(|e| RegistryError::from_reqwest(operation, e))
	}
}

#[async_trait::async_trait]
impl FollowerRegistryApi for HttpFollowerRegistry {
	async fn list_clients(&self) -> Result<Vec<Client>, RegistryError> {
		const OPERATION: &str = "GET /clients";
		let records: Vec<serde_json::Value> = self
			.send(OPERATION, self.http_client.get(self.url("clients")))
			.await?
			.json()
			.await
			.map_err(|e| RegistryError::from_reqwest(OPERATION, e))?;

		Ok(records
			.into_iter()
			.filter_map(|record| match serde_json::from_value::<Client>(record.clone()) {
				Ok(client) => Some(client),
				Err(e) => {
					warn!("Skipping unreadable client {record}: {e}");
					None
				},
			})
			.collect())
	}

	async fn list_followers(
		&self,
		flow_sender: RegistryAddress,
	) -> Result<Vec<Follower>, RegistryError> {
		const OPERATION: &str = "GET /followers";
		self.send(
			OPERATION,
			self.http_client
				.get(self.url("followers"))
				.query(&[("flowSenderAddress", flow_sender.as_str())]),
		)
		.await?
		.json()
		.await
		.map_err(|e| RegistryError::from_reqwest(OPERATION, e))
	}

	async fn add_follower(
		&self,
		follower: RegistryAddress,
		flow_sender: RegistryAddress,
	) -> Result<(), RegistryError> {
		self.send(
			"POST /followers",
			self.http_client
				.post(self.url("followers"))
				.json(&Follower { follower_address: follower, flow_sender_address: flow_sender }),
		)
		.await
		.map(|_| ())
	}

	async fn remove_follower(
		&self,
		flow_sender: RegistryAddress,
		follower: RegistryAddress,
	) -> Result<(), RegistryError> {
		self.send(
			"DELETE /followers",
			self.http_client.delete(self.url("followers")).query(&[
				("flowSenderAddress", flow_sender.as_str()),
				("followerAddress", follower.as_str()),
			]),
		)
		.await
		.map(|_| ())
	}
}
