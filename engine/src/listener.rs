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

//! Turns Lens `Followed` events into flows for the followers of registered clients.

use std::{
	future::Future,
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc, Mutex,
	},
};

use anyhow::Context;
use ethers::{
	contract::EthEvent,
	providers::{Middleware, Provider, Ws},
	types::{Filter, Log, H160, H256, U256},
};
use futures::{Stream, StreamExt};
use tokio::sync::RwLock;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{
	common::KeyedLock,
	eth::{contracts::FollowedFilter, event::Event, redact_endpoint_secret, EthRpcApi},
	flow::{FlowController, FlowError},
	registry::{Client, FollowerRegistryApi},
	resolver::AddressResolver,
	settings::{self, Contracts},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
	Idle,
	Subscribed,
	/// Subscribed, with at least one event in flight.
	Processing,
	Failed,
	Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
	/// The followed profile is not a client.
	Ignored,
	/// The client was removed from the registry after the event was filtered.
	ClientGone { profile_id: U256 },
	AlreadyStreaming { follower: H160, sender: H160 },
	FlowCreated { follower: H160, sender: H160, tx_hash: H256 },
}

pub struct EventListener<Rpc, Registry> {
	registry: Arc<Registry>,
	resolver: AddressResolver<Rpc>,
	flows: FlowController<Rpc, Registry>,
	super_token: H160,
	max_concurrent_events: usize,
	/// Most recent client list, used to filter events before touching the registry.
	clients: RwLock<Vec<Client>>,
	/// Serialises the follower check and flow creation per (sender, follower).
	pair_locks: KeyedLock<(H160, H160)>,
	state: Mutex<ListenerState>,
	in_flight: AtomicUsize,
}

impl<Rpc: EthRpcApi, Registry: FollowerRegistryApi> EventListener<Rpc, Registry> {
	pub fn new(
		rpc: Arc<Rpc>,
		registry: Arc<Registry>,
		contracts: &Contracts,
		flow_settings: &settings::Flows,
	) -> Self {
		Self {
			resolver: AddressResolver::new(rpc.clone(), contracts.follow_relayer),
			flows: FlowController::new(
				rpc,
				registry.clone(),
				contracts.cfa_forwarder,
				flow_settings.gas_limit,
				flow_settings.transaction_timeout(),
			),
			registry,
			super_token: contracts.super_token,
			max_concurrent_events: flow_settings.max_concurrent_events,
			clients: RwLock::new(Vec::new()),
			pair_locks: KeyedLock::default(),
			state: Mutex::new(ListenerState::Idle),
			in_flight: AtomicUsize::new(0),
		}
	}

	pub fn state(&self) -> ListenerState {
		let state = *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
		if state == ListenerState::Subscribed && self.in_flight.load(Ordering::SeqCst) > 0 {
			ListenerState::Processing
		} else {
			state
		}
	}

	fn set_state(&self, state: ListenerState) {
		*self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
	}

	/// Replaces the client snapshot with the registry's current list.
	pub async fn load_clients(&self) -> Result<Vec<Client>, FlowError> {
		let clients = self.registry.list_clients().await?;
		*self.clients.write().await = clients.clone();
		Ok(clients)
	}

	async fn is_client_profile(&self, profile_id: U256) -> bool {
		self.clients.read().await.iter().any(|client| client.client_profile_id == profile_id)
	}

	/// Reconciles a single follow. Only the first followed profile is considered.
	pub async fn process_event(
		&self,
		event: &Event<FollowedFilter>,
	) -> Result<EventOutcome, FlowError> {
		let Some(&profile_id) = event.event_parameters.profile_ids.first() else {
			return Ok(EventOutcome::Ignored)
		};
		if !self.is_client_profile(profile_id).await {
			return Ok(EventOutcome::Ignored)
		}

		let Some(client) = self
			.load_clients()
			.await?
			.into_iter()
			.find(|client| client.client_profile_id == profile_id)
		else {
			return Ok(EventOutcome::ClientGone { profile_id })
		};
		let sender = client.flow_sender_address;

		let follower =
			self.resolver.resolve(event.event_parameters.follower, Some(event.tx_hash)).await?;

		let _pair_guard = self.pair_locks.lock((sender.address(), follower)).await;

		if self
			.registry
			.list_followers(sender.clone())
			.await?
			.iter()
			.any(|registered| registered.follower_address == follower)
		{
			return Ok(EventOutcome::AlreadyStreaming { follower, sender: sender.address() })
		}

		let receipt = self
			.flows
			.create_flow(follower, client.monthly_amount, &sender, self.super_token)
			.await?;

		Ok(EventOutcome::FlowCreated {
			follower,
			sender: sender.address(),
			tx_hash: receipt.transaction_hash,
		})
	}

	async fn handle_event(&self, event: Event<FollowedFilter>) {
		self.in_flight.fetch_add(1, Ordering::SeqCst);
		async {
			match self.process_event(&event).await {
				Ok(EventOutcome::Ignored) => debug!("Ignoring follow of a non-client profile"),
				Ok(EventOutcome::ClientGone { profile_id }) =>
					warn!("Client for profile {profile_id:#x} is no longer registered, skipping"),
				Ok(EventOutcome::AlreadyStreaming { follower, sender }) =>
					info!("{follower:?} already receives a flow from {sender:?}, skipping"),
				Ok(EventOutcome::FlowCreated { follower, sender, tx_hash }) =>
					info!("Created flow from {sender:?} to {follower:?} in tx {tx_hash:#x}"),
				Err(e) => error!("Failed to process {event}: {e}"),
			}
		}
		.instrument(info_span!(
			"FollowedEvent",
			tx_hash = ?event.tx_hash,
			log_index = %event.log_index
		))
		.await;
		self.in_flight.fetch_sub(1, Ordering::SeqCst);
	}

	/// Processes logs until the stream ends or `shutdown` resolves. Events are taken in delivery
	/// order and up to `max_concurrent_events` are processed at once. In-flight events are dropped
	/// on shutdown.
	pub async fn run<S, F>(&self, logs: S, shutdown: F)
	where
		S: Stream<Item = Log>,
		F: Future<Output = ()>,
	{
		self.set_state(ListenerState::Subscribed);

		let processing_loop = logs
			.map(Event::<FollowedFilter>::new_from_unparsed_logs)
			.for_each_concurrent(self.max_concurrent_events, |parse_result| async move {
				match parse_result {
					Ok(event) => self.handle_event(event).await,
					Err(e) => error!("Unable to parse Followed log: {e:#}"),
				}
			});

		tokio::select! {
			_ = processing_loop => warn!("Followed event stream ended"),
			_ = shutdown => info!("Shutting down the event listener"),
		}

		self.in_flight.store(0, Ordering::SeqCst);
		self.set_state(ListenerState::Stopped);
	}

	/// Loads the clients, subscribes to the hub's `Followed` events over websocket and runs until
	/// `shutdown` resolves.
	pub async fn listen<F>(
		&self,
		ws_node_endpoint: &str,
		lens_hub: H160,
		shutdown: F,
	) -> anyhow::Result<()>
	where
		F: Future<Output = ()>,
	{
		let subscribed = async {
			let clients = self.load_clients().await.context("Failed to load clients")?;
			info!("Loaded {} clients", clients.len());

			info!("Connecting to WS node at {}", redact_endpoint_secret(ws_node_endpoint));
			let provider = Provider::<Ws>::connect(ws_node_endpoint)
				.await
				.context("Failed to connect to the WS node")?;
			anyhow::Ok(provider)
		}
		.await;

		let provider = match subscribed {
			Ok(provider) => provider,
			Err(e) => {
				self.set_state(ListenerState::Failed);
				return Err(e)
			},
		};

		let filter = Filter::new().address(lens_hub).topic0(FollowedFilter::signature());
		let mut logs = match provider.subscribe_logs(&filter).await {
			Ok(logs) => logs,
			Err(e) => {
				self.set_state(ListenerState::Failed);
				return Err(e).context("Failed to subscribe to Followed events")
			},
		};
		info!("Subscribed to Followed events of {lens_hub:?}");

		self.run(&mut logs, shutdown).await;

		if let Err(e) = logs.unsubscribe().await {
			warn!("Failed to unsubscribe from Followed events: {e}");
		}
		Ok(())
	}
}
