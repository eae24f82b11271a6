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

use ethers::types::H160;
use futures::{stream, StreamExt};
use itertools::Itertools;
use tracing::{info, info_span, warn, Instrument};

use crate::{
	eligibility::EligibilityChecker,
	eth::EthRpcApi,
	flow::{FlowController, FlowError},
	registry::{FollowerRegistryApi, RegistryAddress},
	settings::{self, Contracts},
};

#[derive(Debug, Default)]
pub struct SweepReport {
	/// Followers whose flow was deleted, or turned out to be gone already.
	pub cleaned: Vec<H160>,
	/// Followers that are still eligible.
	pub skipped: Vec<H160>,
	pub errors: Vec<(H160, FlowError)>,
}

impl SweepReport {
	fn merge(&mut self, other: SweepReport) {
		self.cleaned.extend(other.cleaned);
		self.skipped.extend(other.skipped);
		self.errors.extend(other.errors);
	}
}

enum SweepResult {
	Cleaned,
	Skipped,
}

/// Revokes the flows of followers that no longer hold the eligibility NFT.
pub struct CleanupSweeper<Rpc, Registry> {
	registry: Arc<Registry>,
	eligibility: EligibilityChecker<Rpc>,
	flows: FlowController<Rpc, Registry>,
	max_concurrent_sweeps: usize,
}

impl<Rpc: EthRpcApi, Registry: FollowerRegistryApi> CleanupSweeper<Rpc, Registry> {
	pub fn new(
		rpc: Arc<Rpc>,
		registry: Arc<Registry>,
		contracts: &Contracts,
		flow_settings: &settings::Flows,
	) -> Self {
		Self {
			eligibility: EligibilityChecker::new(rpc.clone(), contracts.eligibility_nft),
			flows: FlowController::new(
				rpc,
				registry.clone(),
				contracts.cfa_forwarder,
				flow_settings.gas_limit,
				flow_settings.transaction_timeout(),
			),
			registry,
			max_concurrent_sweeps: flow_settings.max_concurrent_sweeps,
		}
	}

	async fn sweep_follower(
		&self,
		follower: &RegistryAddress,
		sender: &RegistryAddress,
		super_token: H160,
	) -> Result<SweepResult, FlowError> {
		if self.eligibility.is_eligible(follower.address()).await? {
			return Ok(SweepResult::Skipped)
		}
		info!("{follower} is no longer eligible, deleting its flow");
		self.flows.delete_flow(follower, sender, super_token).await?;
		Ok(SweepResult::Cleaned)
	}

	/// Checks every registered follower of `sender`. Failing to list the followers fails the sweep,
	/// a failure for one follower is recorded in the report.
	pub async fn sweep(
		&self,
		sender: &RegistryAddress,
		super_token: H160,
	) -> Result<SweepReport, FlowError> {
		async move {
			let followers = self.registry.list_followers(sender.clone()).await?;
			info!("Sweeping {} followers", followers.len());

			let addresses = followers
				.into_iter()
				.map(|follower| follower.follower_address)
				.unique_by(RegistryAddress::address);
			let results = stream::iter(addresses)
				.map(|follower| async move {
					let result = self.sweep_follower(&follower, sender, super_token).await;
					(follower.address(), result)
				})
				.buffered(self.max_concurrent_sweeps)
				.collect::<Vec<_>>()
				.await;

			let mut report = SweepReport::default();
			for (follower, result) in results {
				match result {
					Ok(SweepResult::Cleaned) => report.cleaned.push(follower),
					Ok(SweepResult::Skipped) => report.skipped.push(follower),
					Err(e) => {
						warn!("Failed to sweep {follower:?}: {e}");
						report.errors.push((follower, e));
					},
				}
			}

			info!(
				"Sweep done: {} cleaned, {} skipped, {} errors",
				report.cleaned.len(),
				report.skipped.len(),
				report.errors.len()
			);
			Ok(report)
		}
		.instrument(info_span!("Sweep", %sender))
		.await
	}

	/// Sweeps the sender of every client, one sender at a time.
	pub async fn sweep_all(&self, super_token: H160) -> Result<SweepReport, FlowError> {
		let senders = self
			.registry
			.list_clients()
			.await?
			.into_iter()
			.map(|client| client.flow_sender_address)
			.unique_by(RegistryAddress::address)
			.collect::<Vec<_>>();

		let mut report = SweepReport::default();
		for sender in senders {
			match self.sweep(&sender, super_token).await {
				Ok(sender_report) => report.merge(sender_report),
				Err(e) => warn!("Failed to sweep the followers of {sender}: {e}"),
			}
		}
		Ok(report)
	}
}
