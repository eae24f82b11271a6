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

use std::str::FromStr;

use anyhow::{bail, Context};
use ethers::{
	middleware::{NonceManagerMiddleware, SignerMiddleware},
	prelude::*,
	providers::MiddlewareError,
	types::transaction::eip2718::TypedTransaction,
};
use thiserror::Error;
use tracing::info;

use crate::{
	common::read_clean_and_decode_hex_str_file,
	constants::{ETH_HTTP_REQUEST_TIMEOUT, ETH_NODE_CONNECTION_TIMEOUT},
	settings,
};

use super::redact_endpoint_secret;

#[cfg(test)]
use mockall::automock;

#[derive(Error, Debug)]
pub enum EthRpcError {
	/// The node could not be reached, or answered with something other than a revert.
	#[error("ETH node request failed: {0}")]
	Transport(String),
	#[error("execution reverted: {message}")]
	Reverted { message: String, data: Option<Bytes> },
	#[error("insufficient funds: {0}")]
	InsufficientFunds(String),
}

impl EthRpcError {
	/// Sorts a middleware error into the cases callers act on. Reverts surface during gas
	/// estimation, before anything is broadcast.
	pub fn from_middleware_error<E: MiddlewareError>(error: E) -> Self {
		match error.as_error_response() {
			Some(response) if response.message.to_lowercase().contains("insufficient funds") =>
				Self::InsufficientFunds(response.message.clone()),
			Some(response) if response.is_revert() => Self::Reverted {
				message: response.message.clone(),
				data: response.as_revert_data(),
			},
			_ => Self::Transport(error.to_string()),
		}
	}
}

type SigningClient = NonceManagerMiddleware<SignerMiddleware<Provider<Http>, LocalWallet>>;

/// The single seam between the engine and the chain.
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait EthRpcApi: Send + Sync + 'static {
	/// The operator account that signs flow transactions.
	fn address(&self) -> H160;

	async fn transaction(&self, tx_hash: H256) -> Result<Option<Transaction>, EthRpcError>;

	async fn gas_price(&self) -> Result<U256, EthRpcError>;

	/// Read-only call against the latest block.
	async fn call(&self, tx: TypedTransaction) -> Result<Bytes, EthRpcError>;

	/// Signs and broadcasts. Nonces are assigned locally so concurrent submissions don't collide.
	async fn send_transaction(&self, tx: TypedTransaction) -> Result<TxHash, EthRpcError>;

	async fn transaction_receipt(
		&self,
		tx_hash: H256,
	) -> Result<Option<TransactionReceipt>, EthRpcError>;
}

#[derive(Clone)]
pub struct EthersRpcClient {
	signer: std::sync::Arc<SigningClient>,
}

impl EthersRpcClient {
	pub async fn new(eth_settings: &settings::Eth, expected_chain_id: u64) -> anyhow::Result<Self> {
		info!(
			"Connecting to HTTP node at {}",
			redact_endpoint_secret(&eth_settings.http_node_endpoint)
		);

		let provider = Provider::new(Http::new_with_client(
			url::Url::parse(&eth_settings.http_node_endpoint)?,
			reqwest::Client::builder().timeout(ETH_HTTP_REQUEST_TIMEOUT).build()?,
		));

		let wallet = read_clean_and_decode_hex_str_file(
			&eth_settings.private_key_file,
			"Ethereum Private Key",
			|key| LocalWallet::from_str(key).map_err(anyhow::Error::new),
		)?;

		let chain_id = tokio::time::timeout(ETH_NODE_CONNECTION_TIMEOUT, provider.get_chainid())
			.await
			.context("Timed out fetching the chain id")?
			.context("Failed to fetch the chain id")?;
		if chain_id != expected_chain_id.into() {
			bail!(
				"Connected to a node with chain id {chain_id}, expected {expected_chain_id}. \
				Please check the configured network and node endpoints."
			);
		}

		let wallet = wallet.with_chain_id(expected_chain_id);
		let address = wallet.address();
		info!("Signing flow transactions as operator {address:?}");

		Ok(Self {
			signer: std::sync::Arc::new(NonceManagerMiddleware::new(
				SignerMiddleware::new(provider, wallet),
				address,
			)),
		})
	}
}

#[async_trait::async_trait]
impl EthRpcApi for EthersRpcClient {
	fn address(&self) -> H160 {
		self.signer.inner().address()
	}

	async fn transaction(&self, tx_hash: H256) -> Result<Option<Transaction>, EthRpcError> {
		self.signer
			.get_transaction(tx_hash)
			.await
			.map_err(EthRpcError::from_middleware_error)
	}

	async fn gas_price(&self) -> Result<U256, EthRpcError> {
		self.signer.get_gas_price().await.map_err(EthRpcError::from_middleware_error)
	}

	async fn call(&self, tx: TypedTransaction) -> Result<Bytes, EthRpcError> {
		self.signer.call(&tx, None).await.map_err(EthRpcError::from_middleware_error)
	}

	async fn send_transaction(&self, mut tx: TypedTransaction) -> Result<TxHash, EthRpcError> {
		tx.set_from(self.address());

		// The nonce manager hands out a nonce before the inner middleware runs, so a revert must
		// surface here or the nonce is lost.
		match tx.gas() {
			None => {
				let gas = self
					.signer
					.estimate_gas(&tx, None)
					.await
					.map_err(EthRpcError::from_middleware_error)?;
				tx.set_gas(gas);
			},
			Some(_) => {
				self.signer.call(&tx, None).await.map_err(EthRpcError::from_middleware_error)?;
			},
		}

		Ok(self
			.signer
			.send_transaction(tx, None)
			.await
			.map_err(EthRpcError::from_middleware_error)?
			.tx_hash())
	}

	async fn transaction_receipt(
		&self,
		tx_hash: H256,
	) -> Result<Option<TransactionReceipt>, EthRpcError> {
		self.signer
			.get_transaction_receipt(tx_hash)
			.await
			.map_err(EthRpcError::from_middleware_error)
	}
}
