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

use anyhow::{anyhow, Result};
use ethers::{
	abi::RawLog,
	contract::EthLogDecode,
	types::{Log, H256, U256},
};

use std::fmt::Debug;

/// Type for storing common (i.e. tx_hash) and specific event information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event<EventParameters: Debug> {
	/// The transaction hash of the transaction that emitted this event
	pub tx_hash: H256,
	/// The index number of this particular log, in the list of logs emitted by the tx_hash
	pub log_index: U256,
	/// The event specific parameters
	pub event_parameters: EventParameters,
}

impl<EventParameters: Debug> std::fmt::Display for Event<EventParameters> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(
			f,
			"EventParameters: {:?}; tx_hash: {:#x}; log_index: {}",
			self.event_parameters, self.tx_hash, self.log_index
		)
	}
}

impl<EventParameters: Debug + EthLogDecode> Event<EventParameters> {
	pub fn new_from_unparsed_logs(log: Log) -> Result<Self> {
		Ok(Self {
			tx_hash: log
				.transaction_hash
				.ok_or_else(|| anyhow!("Could not get transaction hash from ETH log"))?,
			log_index: log
				.log_index
				.ok_or_else(|| anyhow!("Could not get log index from ETH log"))?,
			event_parameters: EventParameters::decode_log(&RawLog {
				topics: log.topics,
				data: log.data.to_vec(),
			})?,
		})
	}
}


#[cfg(test)]
mod tests {
	use super::{test_utils::followed_log, *};
	use crate::eth::contracts::FollowedFilter;
	use ethers::types::H160;

	#[test]
	fn parses_followed_log() {
		let follower = H160::repeat_byte(0x11);
		let tx_hash = H256::repeat_byte(0xaa);

		let event = Event::<FollowedFilter>::new_from_unparsed_logs(followed_log(
			follower,
			vec![U256::from(0x01a3)],
			Some(tx_hash),
		))
		.unwrap();

		assert_eq!(event.tx_hash, tx_hash);
		assert_eq!(event.log_index, U256::from(3));
		assert_eq!(event.event_parameters.follower, follower);
		assert_eq!(event.event_parameters.profile_ids, vec![U256::from(0x01a3)]);
	}

	#[test]
	fn log_without_tx_hash_is_rejected() {
		assert!(Event::<FollowedFilter>::new_from_unparsed_logs(followed_log(
			H160::repeat_byte(0x11),
			vec![U256::one()],
			None,
		))
		.is_err());
	}

	#[test]
	fn log_with_foreign_signature_is_rejected() {
		let mut log = followed_log(H160::zero(), vec![U256::one()], Some(H256::zero()));
		log.topics[0] = H256::repeat_byte(0x42);
		assert!(Event::<FollowedFilter>::new_from_unparsed_logs(log).is_err());
	}
}
