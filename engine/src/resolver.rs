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
	abi::AbiDecode,
	types::{H160, H256},
};
use thiserror::Error;
use tracing::debug;

use crate::eth::{contracts::FollowForCall, EthRpcApi, EthRpcError};

#[derive(Error, Debug)]
pub enum ResolveError {
	#[error("cannot resolve relayed follower: {0}")]
	Decode(String),
	#[error("cannot fetch relayed follow transaction: {0}")]
	Network(#[from] EthRpcError),
}

/// Finds the real beneficiary of a follow. Follows submitted through the relayer are emitted with
/// the relayer as `follower`; the beneficiary is then the first `mintFor` entry of the
/// `followFor` call that emitted the event.
pub struct AddressResolver<Rpc> {
	rpc: Arc<Rpc>,
	relayer: H160,
}

impl<Rpc: EthRpcApi> AddressResolver<Rpc> {
	pub fn new(rpc: Arc<Rpc>, relayer: H160) -> Self {
		Self { rpc, relayer }
	}

	pub async fn resolve(&self, raw: H160, tx_hash: Option<H256>) -> Result<H160, ResolveError> {
		if raw != self.relayer {
			return Ok(raw)
		}

		let tx_hash = tx_hash.ok_or_else(|| {
			ResolveError::Decode("follow came from the relayer but has no tx hash".to_string())
		})?;

		let tx = self.rpc.transaction(tx_hash).await?.ok_or_else(|| {
			ResolveError::Decode(format!("relayed follow transaction {tx_hash:#x} not found"))
		})?;

		let call = FollowForCall::decode(&tx.input).map_err(|e| {
			ResolveError::Decode(format!("tx {tx_hash:#x} is not a followFor call: {e}"))
		})?;

		let beneficiary = call.mint_for.first().copied().ok_or_else(|| {
			ResolveError::Decode(format!("followFor call in tx {tx_hash:#x} has an empty mintFor"))
		})?;

		debug!("Relayed follow in tx {tx_hash:#x} resolved to {beneficiary:?}");
		Ok(beneficiary)
	}
}
