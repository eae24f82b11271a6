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

use std::sync::Arc;

use ethers::{
	abi::{AbiDecode, AbiEncode},
	types::{TransactionRequest, H160},
};
use tracing::debug;

use crate::{
	eth::{
		contracts::{BalanceOfCall, BalanceOfReturn},
		EthRpcApi,
	},
	flow::FlowError,
};

/// An address stays eligible for its flow while it holds at least one of the NFTs.
pub struct EligibilityChecker<Rpc> {
	rpc: Arc<Rpc>,
	nft: H160,
}

impl<Rpc: EthRpcApi> EligibilityChecker<Rpc> {
	pub fn new(rpc: Arc<Rpc>, nft: H160) -> Self {
		Self { rpc, nft }
	}

	pub async fn is_eligible(&self, address: H160) -> Result<bool, FlowError> {
		let request =
			TransactionRequest::new().to(self.nft).data(BalanceOfCall { owner: address }.encode());
		let output = self
			.rpc
			.call(request.into())
			.await
			.map_err(|e| FlowError::Network(e.to_string()))?;

		let BalanceOfReturn(balance) = BalanceOfReturn::decode(&output).map_err(|e| {
			FlowError::Decode(format!("malformed balanceOf({address:?}) result {output}: {e}"))
		})?;

		debug!("{address:?} holds {balance} eligibility NFTs");
		Ok(!balance.is_zero())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::eth::{rpc::MockEthRpcApi, EthRpcError};
	use ethers::types::{Bytes, NameOrAddress, U256};

	const NFT: H160 = H160([0xa7; 20]);

	fn checker_returning(
		result: impl Fn() -> Result<Bytes, EthRpcError> + Send + 'static,
	) -> EligibilityChecker<MockEthRpcApi> {
		let mut rpc = MockEthRpcApi::new();
		rpc.expect_call()
			.withf(|tx| {
				let call = BalanceOfCall::decode(tx.data().unwrap()).unwrap();
				tx.to() == Some(&NameOrAddress::Address(NFT)) && call.owner == H160::repeat_byte(1)
			})
			.times(1)
			.returning(move |_| result());
		EligibilityChecker::new(Arc::new(rpc), NFT)
	}

	#[tokio::test]
	async fn holders_are_eligible() {
		let checker = checker_returning(|| Ok(U256::from(2).encode().into()));
		assert!(checker.is_eligible(H160::repeat_byte(1)).await.unwrap());
	}

	#[tokio::test]
	async fn empty_balances_are_ineligible() {
		let checker = checker_returning(|| Ok(U256::zero().encode().into()));
		assert!(!checker.is_eligible(H160::repeat_byte(1)).await.unwrap());
	}

	#[tokio::test]
	async fn errors_never_default_to_an_answer() {
		let checker =
			checker_returning(|| Err(EthRpcError::Transport("connection refused".to_string())));
		assert!(matches!(
			checker.is_eligible(H160::repeat_byte(1)).await,
			Err(FlowError::Network(_))
		));

		let checker = checker_returning(|| Ok(Bytes::from(vec![1, 2, 3])));
		assert!(matches!(
			checker.is_eligible(H160::repeat_byte(1)).await,
			Err(FlowError::Decode(_))
		));
	}
}
