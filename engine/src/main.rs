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

use anyhow::Context;
use clap::{Parser, Subcommand};
use ethers::{
	types::{H160, U256},
	utils::parse_units,
};
use futures::FutureExt;
use lens_flow_engine::{
	common::make_periodic_tick,
	constants::SUPER_TOKEN_DECIMALS,
	eligibility::EligibilityChecker,
	eth::EthersRpcClient,
	flow::{DeleteOutcome, FlowController},
	listener::EventListener,
	logging,
	registry::{HttpFollowerRegistry, RegistryAddress},
	settings::{CommandLineOptions, Settings},
	sweeper::{CleanupSweeper, SweepReport},
};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[clap(version, about = "Streams Superfluid flows to the followers of Lens profiles")]
struct Cli {
	#[clap(flatten)]
	settings: CommandLineOptions,

	#[clap(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Create flows for new followers of client profiles until interrupted.
	Listen,
	/// Delete the flows of followers that no longer hold the eligibility NFT.
	Sweep {
		/// Only sweep this sender. Sweeps the sender of every client otherwise.
		#[clap(long)]
		sender: Option<RegistryAddress>,
		/// Repeat the sweep at this interval, in seconds, until interrupted.
		#[clap(long)]
		every: Option<u64>,
	},
	CreateFlow {
		#[clap(long)]
		receiver: H160,
		#[clap(long)]
		sender: RegistryAddress,
		/// Monthly amount in whole tokens, e.g. 30 or 0.5
		#[clap(long)]
		amount: String,
	},
	DeleteFlow {
		#[clap(long)]
		receiver: RegistryAddress,
		#[clap(long)]
		sender: RegistryAddress,
	},
	CheckEligibility {
		#[clap(long)]
		address: H160,
	},
}

async fn shutdown_signal() {
	if let Err(e) = tokio::signal::ctrl_c().await {
		error!("Failed to listen for Ctrl-C, running until killed: {e}");
		futures::future::pending::<()>().await;
	}
}

fn log_report(report: &SweepReport) {
	info!(
		"Sweep report: cleaned {:?}, skipped {:?}, {} errors",
		report.cleaned,
		report.skipped,
		report.errors.len()
	);
	for (follower, e) in &report.errors {
		error!("Sweep of {follower:?} failed: {e}");
	}
}

async fn start(settings: Settings, command: Command) -> anyhow::Result<()> {
	let contracts = settings.contracts();
	let rpc = Arc::new(EthersRpcClient::new(&settings.eth, settings.network.chain_id()).await?);
	let registry = Arc::new(HttpFollowerRegistry::new(&settings.registry)?);

	match command {
		Command::Listen => {
			let listener = EventListener::new(rpc, registry, &contracts, &settings.flows);
			listener
				.listen(&settings.eth.ws_node_endpoint, contracts.lens_hub, shutdown_signal())
				.await?;
		},
		Command::Sweep { sender, every } => {
			let sweeper = CleanupSweeper::new(rpc, registry, &contracts, &settings.flows);
			let sweep_once = || async {
				match &sender {
					Some(sender) => sweeper.sweep(sender, contracts.super_token).await,
					None => sweeper.sweep_all(contracts.super_token).await,
				}
			};

			match every {
				None => log_report(&sweep_once().await?),
				Some(0) => anyhow::bail!("--every must be at least one second"),
				Some(secs) => {
					let mut tick = make_periodic_tick(Duration::from_secs(secs), true);
					let mut shutdown = shutdown_signal().boxed();
					loop {
						tokio::select! {
							_ = tick.tick() => match sweep_once().await {
								Ok(report) => log_report(&report),
								Err(e) => error!("Sweep failed: {e}"),
							},
							_ = &mut shutdown => break,
						}
					}
				},
			}
		},
		Command::CreateFlow { receiver, sender, amount } => {
			let monthly_amount: U256 = parse_units(&amount, SUPER_TOKEN_DECIMALS)
				.with_context(|| format!("Invalid amount {amount}"))?
				.into();
			let receipt = FlowController::new(
				rpc,
				registry,
				contracts.cfa_forwarder,
				settings.flows.gas_limit,
				settings.flows.transaction_timeout(),
			)
			.create_flow(receiver, monthly_amount, &sender, contracts.super_token)
			.await?;
			println!("Flow created in tx {:#x}", receipt.transaction_hash);
		},
		Command::DeleteFlow { receiver, sender } => {
			let outcome = FlowController::new(
				rpc,
				registry,
				contracts.cfa_forwarder,
				settings.flows.gas_limit,
				settings.flows.transaction_timeout(),
			)
			.delete_flow(&receiver, &sender, contracts.super_token)
			.await?;
			match outcome {
				DeleteOutcome::Deleted(receipt) =>
					println!("Flow deleted in tx {:#x}", receipt.transaction_hash),
				DeleteOutcome::AlreadyAbsent => println!("There was no flow to delete"),
			}
		},
		Command::CheckEligibility { address } => {
			let eligible = EligibilityChecker::new(rpc, contracts.eligibility_nft)
				.is_eligible(address)
				.await?;
			println!("{address:?} is {}eligible", if eligible { "" } else { "not " });
		},
	}

	Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();

	let settings = Settings::new(cli.settings).context("Error reading settings")?;
	logging::init(&settings.logging)?;

	info!("Starting lens-flow-engine on {}", settings.network);

	start(settings, cli.command).await.map_err(|e| {
		error!("{e:#}");
		e
	})
}
