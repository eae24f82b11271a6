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

use std::{sync::Arc, time::Duration};

use ethers::{
	abi::{AbiEncode, ParamType},
	types::{Bytes, TransactionReceipt, TransactionRequest, H160, H256, U256, U64},
	utils::id,
};
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};

use crate::{
	constants::{RECEIPT_POLL_INTERVAL, SECONDS_PER_MONTH},
	eth::{
		contracts::{cfa_errors, CreateFlowCall, DeleteFlowCall},
		EthRpcApi, EthRpcError,
	},
	registry::{FollowerRegistryApi, RegistryAddress, RegistryError},
	resolver::ResolveError,
};

#[derive(Error, Debug)]
pub enum FlowError {
	#[error("decode error: {0}")]
	Decode(String),
	#[error("network error: {0}")]
	Network(String),
	#[error("insufficient funds: {0}")]
	InsufficientFunds(String),
	#[error("a flow from {sender:?} to {receiver:?} already exists")]
	FlowAlreadyExists { sender: H160, receiver: H160 },
	#[error("there is no flow from {sender:?} to {receiver:?}")]
	FlowNotFound { sender: H160, receiver: H160 },
	#[error("transaction {tx_hash:?} reverted: {reason}")]
	TransactionReverted { tx_hash: Option<H256>, reason: String },
	#[error("transaction {tx_hash:#x} was not confirmed within {timeout:?}")]
	TransactionTimeout { tx_hash: H256, timeout: Duration },
	#[error("invalid amount: {0}")]
	InvalidAmount(String),
	#[error(transparent)]
	Registry(#[from] RegistryError),
}

impl From<ResolveError> for FlowError {
	fn from(error: ResolveError) -> Self {
		match error {
			ResolveError::Decode(reason) => FlowError::Decode(reason),
			ResolveError::Network(error) => FlowError::Network(error.to_string()),
		}
	}
}

impl FlowError {
	/// Maps node errors of a flow transaction, recognising the constant flow agreement's own
	/// failures among reverts.
	fn from_rpc(error: EthRpcError, sender: H160, receiver: H160) -> Self {
		match error {
			EthRpcError::Transport(message) => FlowError::Network(message),
			EthRpcError::InsufficientFunds(message) => FlowError::InsufficientFunds(message),
			EthRpcError::Reverted { message, data } =>
				match ProtocolError::from_revert(&message, data.as_ref()) {
					Some(ProtocolError::FlowAlreadyExists) =>
						FlowError::FlowAlreadyExists { sender, receiver },
					Some(ProtocolError::FlowDoesNotExist) =>
						FlowError::FlowNotFound { sender, receiver },
					None => FlowError::TransactionReverted {
						tx_hash: None,
						reason: data
							.as_deref()
							.and_then(revert_reason)
							.unwrap_or(message),
					},
				},
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProtocolError {
	FlowAlreadyExists,
	FlowDoesNotExist,
}

impl ProtocolError {
	fn from_revert(message: &str, data: Option<&Bytes>) -> Option<Self> {
		let data = data.map(|data| &data[..]).unwrap_or_default();

		if data.starts_with(&id(cfa_errors::FLOW_ALREADY_EXISTS)) {
			return Some(Self::FlowAlreadyExists)
		}
		if data.starts_with(&id(cfa_errors::FLOW_DOES_NOT_EXIST)) {
			return Some(Self::FlowDoesNotExist)
		}

		let reason = revert_reason(data).unwrap_or_default();
		let protocol_error = [message, reason.as_str()].into_iter().find_map(|text| {
			if text.contains(cfa_errors::LEGACY_FLOW_ALREADY_EXISTS) {
				Some(Self::FlowAlreadyExists)
			} else if text.contains(cfa_errors::LEGACY_FLOW_DOES_NOT_EXIST) {
				Some(Self::FlowDoesNotExist)
			} else {
				None
			}
		});
		protocol_error
	}
}

/// Decodes `Error(string)` revert data.
fn revert_reason(data: &[u8]) -> Option<String> {
	let payload = data.strip_prefix(id("Error(string)").as_slice())?;
	ethers::abi::decode(&[ParamType::String], payload).ok()?.pop()?.into_string()
}

/// Per-second rate streaming `monthly_amount` over a 30 day month, rounded half up.
pub fn flow_rate(monthly_amount: U256) -> U256 {
	monthly_amount.saturating_add(U256::from(SECONDS_PER_MONTH / 2)) / SECONDS_PER_MONTH
}

fn int96_flow_rate(monthly_amount: U256) -> Result<i128, FlowError> {
	if monthly_amount.is_zero() {
		return Err(FlowError::InvalidAmount("the monthly amount must be positive".to_string()))
	}
	let rate = flow_rate(monthly_amount);
	if rate.is_zero() {
		return Err(FlowError::InvalidAmount(format!(
			"a monthly amount of {monthly_amount} base units rounds to a zero flow rate"
		)))
	}
	if rate > U256::from(2).pow(U256::from(95)) - 1 {
		return Err(FlowError::InvalidAmount(format!(
			"flow rate {rate} for a monthly amount of {monthly_amount} does not fit an int96"
		)))
	}
	Ok(rate.as_u128() as i128)
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeleteOutcome {
	Deleted(TransactionReceipt),
	/// There was no flow to delete.
	AlreadyAbsent,
}

/// Creates and deletes flows through the CFAv1 forwarder, as the operator of the senders, and
/// keeps the registry in step with what happened on chain.
pub struct FlowController<Rpc, Registry> {
	rpc: Arc<Rpc>,
	registry: Arc<Registry>,
	cfa_forwarder: H160,
	gas_limit: Option<U256>,
	transaction_timeout: Duration,
}

impl<Rpc: EthRpcApi, Registry: FollowerRegistryApi> FlowController<Rpc, Registry> {
	pub fn new(
		rpc: Arc<Rpc>,
		registry: Arc<Registry>,
		cfa_forwarder: H160,
		gas_limit: Option<u64>,
		transaction_timeout: Duration,
	) -> Self {
		Self {
			rpc,
			registry,
			cfa_forwarder,
			gas_limit: gas_limit.map(U256::from),
			transaction_timeout,
		}
	}

	pub async fn create_flow(
		&self,
		receiver: H160,
		monthly_amount: U256,
		sender: &RegistryAddress,
		super_token: H160,
	) -> Result<TransactionReceipt, FlowError> {
		let flowrate = int96_flow_rate(monthly_amount)?;

		async move {
			let receipt = self
				.submit(
					CreateFlowCall {
						token: super_token,
						sender: sender.address(),
						receiver,
						flowrate,
						user_data: Bytes::new(),
					}
					.encode(),
					sender.address(),
					receiver,
				)
				.await?;
			info!("Created flow of {flowrate}/s, tx {:#x}", receipt.transaction_hash);

			if let Err(e) = self.registry.add_follower(receiver.into(), sender.clone()).await {
				warn!("Flow is live but the registry was not updated: {e}");
			}

			Ok(receipt)
		}
		.instrument(info_span!("CreateFlow", %sender, ?receiver))
		.await
	}

	pub async fn delete_flow(
		&self,
		receiver: &RegistryAddress,
		sender: &RegistryAddress,
		super_token: H160,
	) -> Result<DeleteOutcome, FlowError> {
		async move {
			let outcome = match self
				.submit(
					DeleteFlowCall {
						token: super_token,
						sender: sender.address(),
						receiver: receiver.address(),
						user_data: Bytes::new(),
					}
					.encode(),
					sender.address(),
					receiver.address(),
				)
				.await
			{
				Ok(receipt) => {
					info!("Deleted flow, tx {:#x}", receipt.transaction_hash);
					DeleteOutcome::Deleted(receipt)
				},
				Err(FlowError::FlowNotFound { .. }) => {
					info!("No flow to delete");
					DeleteOutcome::AlreadyAbsent
				},
				Err(e) => return Err(e),
			};

			if let Err(e) = self.registry.remove_follower(sender.clone(), receiver.clone()).await {
				warn!("Flow is gone but the registry was not updated: {e}");
			}

			Ok(outcome)
		}
		.instrument(info_span!("DeleteFlow", %sender, %receiver))
		.await
	}

	async fn submit(
		&self,
		call_data: Vec<u8>,
		sender: H160,
		receiver: H160,
	) -> Result<TransactionReceipt, FlowError> {
		let gas_price = self
			.rpc
			.gas_price()
			.await
			.map_err(|e| FlowError::from_rpc(e, sender, receiver))?;

		let mut tx = TransactionRequest::new()
			.to(self.cfa_forwarder)
			.data(call_data)
			.gas_price(gas_price);
		if let Some(gas_limit) = self.gas_limit {
			tx = tx.gas(gas_limit);
		}

		let tx_hash = self
			.rpc
			.send_transaction(tx.into())
			.await
			.map_err(|e| FlowError::from_rpc(e, sender, receiver))?;
		info!("Submitted tx {tx_hash:#x} at gas price {gas_price}");

		let receipt = self.await_receipt(tx_hash).await?;
		if receipt.status != Some(U64::one()) {
			return Err(FlowError::TransactionReverted {
				tx_hash: Some(tx_hash),
				reason: "transaction was mined with a failure status".to_string(),
			})
		}
		Ok(receipt)
	}

	async fn await_receipt(&self, tx_hash: H256) -> Result<TransactionReceipt, FlowError> {
		tokio::time::timeout(self.transaction_timeout, async {
			loop {
				match self.rpc.transaction_receipt(tx_hash).await {
					Ok(Some(receipt)) => break receipt,
					Ok(None) => {},
					Err(e) => warn!("Failed to fetch receipt of {tx_hash:#x}, retrying: {e}"),
				}
				tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
			}
		})
		.await
		.map_err(|_| FlowError::TransactionTimeout { tx_hash, timeout: self.transaction_timeout })
	}
}


#[cfg(test)]
mod tests {
	use super::{test_utils::*, *};
	use crate::{eth::rpc::MockEthRpcApi, registry::MockFollowerRegistryApi};
	use ethers::{
		abi::{AbiDecode, Token},
		types::NameOrAddress,
	};

	const SENDER: H160 = H160([0x11; 20]);
	const RECEIVER: H160 = H160([0x22; 20]);
	const TX_HASH: H256 = H256([0xaa; 32]);

	fn sender() -> RegistryAddress {
		SENDER.into()
	}

	fn controller(
		rpc: MockEthRpcApi,
		registry: MockFollowerRegistryApi,
	) -> FlowController<MockEthRpcApi, MockFollowerRegistryApi> {
		FlowController::new(
			Arc::new(rpc),
			Arc::new(registry),
			CFA_FORWARDER,
			Some(9_000_000),
			Duration::from_secs(5),
		)
	}

	fn rpc_with_gas_price() -> MockEthRpcApi {
		let mut rpc = MockEthRpcApi::new();
		rpc.expect_gas_price().returning(|| Ok(U256::from(30_000_000_000u64)));
		rpc
	}

	#[test]
	fn flow_rates_round_half_up() {
		assert_eq!(flow_rate(tokens(30)), U256::from(11_574_074_074_074u64));
		assert_eq!(flow_rate(U256::exp10(17) * 5), U256::from(192_901_234_568u64));
		assert_eq!(flow_rate(U256::from(SECONDS_PER_MONTH)), U256::one());
		assert_eq!(flow_rate(U256::from(SECONDS_PER_MONTH / 2)), U256::one());
		assert_eq!(flow_rate(U256::from(SECONDS_PER_MONTH / 2 - 1)), U256::zero());
	}

	#[test]
	fn unrepresentable_amounts_are_rejected() {
		assert!(matches!(int96_flow_rate(U256::zero()), Err(FlowError::InvalidAmount(_))));
		assert!(matches!(int96_flow_rate(U256::from(1_000u64)), Err(FlowError::InvalidAmount(_))));
		assert!(matches!(int96_flow_rate(U256::MAX), Err(FlowError::InvalidAmount(_))));
		assert_eq!(int96_flow_rate(tokens(30)).unwrap(), 11_574_074_074_074i128);
	}

	#[test]
	fn recognises_protocol_errors() {
		let custom_error = Bytes::from(id(cfa_errors::FLOW_ALREADY_EXISTS).to_vec());
		assert_eq!(
			ProtocolError::from_revert("execution reverted", Some(&custom_error)),
			Some(ProtocolError::FlowAlreadyExists)
		);
		assert_eq!(
			ProtocolError::from_revert("execution reverted: CFA: flow does not exist", None),
			Some(ProtocolError::FlowDoesNotExist)
		);

		let mut legacy = id("Error(string)").to_vec();
		legacy.extend(ethers::abi::encode(&[Token::String(
			cfa_errors::LEGACY_FLOW_ALREADY_EXISTS.to_string(),
		)]));
		assert_eq!(
			ProtocolError::from_revert("execution reverted", Some(&Bytes::from(legacy))),
			Some(ProtocolError::FlowAlreadyExists)
		);

		assert_eq!(ProtocolError::from_revert("execution reverted", None), None);
	}

	#[tokio::test]
	async fn create_flow_submits_to_the_forwarder_and_registers_the_follower() {
		let mut rpc = rpc_with_gas_price();
		rpc.expect_send_transaction()
			.withf(|tx| {
				let call = CreateFlowCall::decode(tx.data().unwrap()).unwrap();
				tx.to() == Some(&NameOrAddress::Address(CFA_FORWARDER)) &&
					tx.gas_price() == Some(U256::from(30_000_000_000u64)) &&
					tx.gas() == Some(&U256::from(9_000_000)) &&
					call.token == SUPER_TOKEN &&
					call.sender == SENDER &&
					call.receiver == RECEIVER &&
					call.flowrate == 11_574_074_074_074i128
			})
			.times(1)
			.returning(|_| Ok(TX_HASH));
		rpc.expect_transaction_receipt()
			.times(1)
			.returning(|hash| Ok(Some(receipt(hash, 1))));

		let mut registry = MockFollowerRegistryApi::new();
		registry
			.expect_add_follower()
			.withf(|follower, sender| *follower == RECEIVER && *sender == SENDER)
			.times(1)
			.returning(|_, _| Ok(()));

		let receipt = controller(rpc, registry)
			.create_flow(RECEIVER, tokens(30), &sender(), SUPER_TOKEN)
			.await
			.unwrap();
		assert_eq!(receipt.transaction_hash, TX_HASH);
	}

	#[tokio::test]
	async fn existing_flow_is_reported_and_not_registered() {
		let mut rpc = rpc_with_gas_price();
		rpc.expect_send_transaction()
			.times(1)
			.returning(|_| Err(revert_with_selector(cfa_errors::FLOW_ALREADY_EXISTS)));

		let mut registry = MockFollowerRegistryApi::new();
		registry.expect_add_follower().never();

		assert!(matches!(
			controller(rpc, registry).create_flow(RECEIVER, tokens(30), &sender(), SUPER_TOKEN).await,
			Err(FlowError::FlowAlreadyExists { sender, receiver })
				if sender == SENDER && receiver == RECEIVER
		));
	}

	#[tokio::test]
	async fn registry_write_failures_do_not_fail_the_flow() {
		let mut rpc = rpc_with_gas_price();
		rpc.expect_send_transaction().times(1).returning(|_| Ok(TX_HASH));
		rpc.expect_transaction_receipt().returning(|hash| Ok(Some(receipt(hash, 1))));

		let mut registry = MockFollowerRegistryApi::new();
		registry.expect_add_follower().times(1).returning(|_, _| {
			Err(RegistryError::Decode {
				operation: "POST /followers",
				source: reqwest_error(),
			})
		});

		assert!(controller(rpc, registry)
			.create_flow(RECEIVER, tokens(30), &sender(), SUPER_TOKEN)
			.await
			.is_ok());
	}

	// reqwest errors can't be built directly, so make one from an invalid request.
	fn reqwest_error() -> reqwest::Error {
		reqwest::Client::new().get("not a url").build().unwrap_err()
	}

	#[tokio::test]
	async fn insufficient_funds_and_transport_errors_propagate() {
		let mut rpc = rpc_with_gas_price();
		rpc.expect_send_transaction()
			.times(1)
			.returning(|_| Err(EthRpcError::InsufficientFunds("gas * price".to_string())));
		assert!(matches!(
			controller(rpc, MockFollowerRegistryApi::new())
				.create_flow(RECEIVER, tokens(30), &sender(), SUPER_TOKEN)
				.await,
			Err(FlowError::InsufficientFunds(_))
		));

		let mut rpc = MockEthRpcApi::new();
		rpc.expect_gas_price()
			.times(1)
			.returning(|| Err(EthRpcError::Transport("timed out".to_string())));
		rpc.expect_send_transaction().never();
		assert!(matches!(
			controller(rpc, MockFollowerRegistryApi::new())
				.create_flow(RECEIVER, tokens(30), &sender(), SUPER_TOKEN)
				.await,
			Err(FlowError::Network(_))
		));
	}

	#[tokio::test]
	async fn invalid_amounts_never_reach_the_chain() {
		let mut rpc = MockEthRpcApi::new();
		rpc.expect_gas_price().never();
		rpc.expect_send_transaction().never();

		assert!(matches!(
			controller(rpc, MockFollowerRegistryApi::new())
				.create_flow(RECEIVER, U256::zero(), &sender(), SUPER_TOKEN)
				.await,
			Err(FlowError::InvalidAmount(_))
		));
	}

	#[tokio::test]
	async fn failed_receipts_are_reverts() {
		let mut rpc = rpc_with_gas_price();
		rpc.expect_send_transaction().times(1).returning(|_| Ok(TX_HASH));
		rpc.expect_transaction_receipt().returning(|hash| Ok(Some(receipt(hash, 0))));

		let mut registry = MockFollowerRegistryApi::new();
		registry.expect_add_follower().never();

		assert!(matches!(
			controller(rpc, registry).create_flow(RECEIVER, tokens(30), &sender(), SUPER_TOKEN).await,
			Err(FlowError::TransactionReverted { tx_hash: Some(tx_hash), .. })
				if tx_hash == TX_HASH
		));
	}

	#[tokio::test]
	async fn unconfirmed_transactions_time_out() {
		let mut rpc = rpc_with_gas_price();
		rpc.expect_send_transaction().times(1).returning(|_| Ok(TX_HASH));
		rpc.expect_transaction_receipt().returning(|_| Ok(None));

		let mut registry = MockFollowerRegistryApi::new();
		registry.expect_add_follower().never();

		let controller = FlowController::new(
			Arc::new(rpc),
			Arc::new(registry),
			CFA_FORWARDER,
			None,
			Duration::from_millis(50),
		);
		assert!(matches!(
			controller.create_flow(RECEIVER, tokens(30), &sender(), SUPER_TOKEN).await,
			Err(FlowError::TransactionTimeout { tx_hash, .. }) if tx_hash == TX_HASH
		));
	}

	#[tokio::test]
	async fn delete_flow_removes_the_follower() {
		let mut rpc = rpc_with_gas_price();
		rpc.expect_send_transaction()
			.withf(|tx| {
				let call = DeleteFlowCall::decode(tx.data().unwrap()).unwrap();
				call.sender == SENDER && call.receiver == RECEIVER && call.token == SUPER_TOKEN
			})
			.times(1)
			.returning(|_| Ok(TX_HASH));
		rpc.expect_transaction_receipt().returning(|hash| Ok(Some(receipt(hash, 1))));

		let mut registry = MockFollowerRegistryApi::new();
		registry
			.expect_remove_follower()
			.withf(|sender, follower| *sender == SENDER && *follower == RECEIVER)
			.times(1)
			.returning(|_, _| Ok(()));

		assert!(matches!(
			controller(rpc, registry).delete_flow(&RECEIVER.into(), &sender(), SUPER_TOKEN).await,
			Ok(DeleteOutcome::Deleted(_))
		));
	}

	#[tokio::test]
	async fn deleting_a_missing_flow_succeeds_and_still_cleans_the_registry() {
		let mut rpc = rpc_with_gas_price();
		rpc.expect_send_transaction()
			.times(1)
			.returning(|_| Err(revert_with_selector(cfa_errors::FLOW_DOES_NOT_EXIST)));
		rpc.expect_transaction_receipt().never();

		let mut registry = MockFollowerRegistryApi::new();
		registry.expect_remove_follower().times(1).returning(|_, _| Ok(()));

		assert_eq!(
			controller(rpc, registry)
				.delete_flow(&RECEIVER.into(), &sender(), SUPER_TOKEN)
				.await
				.unwrap(),
			DeleteOutcome::AlreadyAbsent
		);
	}

	#[tokio::test]
	async fn registry_writes_echo_the_registry_spelling_of_addresses() {
		const STORED_SENDER: &str = "0xc0c95420b00b46cad44eed898471d9b32ce818b4";
		const STORED_RECEIVER: &str = "0x2222222222222222222222222222222222222222";

		let mut rpc = rpc_with_gas_price();
		rpc.expect_send_transaction().times(2).returning(|_| Ok(TX_HASH));
		rpc.expect_transaction_receipt().returning(|hash| Ok(Some(receipt(hash, 1))));

		let mut registry = MockFollowerRegistryApi::new();
		registry
			.expect_add_follower()
			.withf(|follower, sender| {
				follower.as_str() == "0x2222222222222222222222222222222222222222" &&
					sender.as_str() == STORED_SENDER
			})
			.times(1)
			.returning(|_, _| Ok(()));
		registry
			.expect_remove_follower()
			.withf(|sender, follower| {
				sender.as_str() == STORED_SENDER && follower.as_str() == STORED_RECEIVER
			})
			.times(1)
			.returning(|_, _| Ok(()));

		let sender: RegistryAddress = STORED_SENDER.parse().unwrap();
		let controller = controller(rpc, registry);
		controller.create_flow(RECEIVER, tokens(30), &sender, SUPER_TOKEN).await.unwrap();
		controller
			.delete_flow(&STORED_RECEIVER.parse().unwrap(), &sender, SUPER_TOKEN)
			.await
			.unwrap();
	}
}
