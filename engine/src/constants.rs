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

use std::time::Duration;

// ======= Flows =======

/// A calendar month as used for flow rates: 30 days.
pub const SECONDS_PER_MONTH: u64 = 2_592_000;

/// Decimals of the streamed super token. Monthly amounts are given in whole tokens.
pub const SUPER_TOKEN_DECIMALS: u32 = 18;

/// Duration after which an unconfirmed flow transaction is reported as timed out
pub const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(180);

/// Duration between receipt polls while waiting for a flow transaction to be mined
pub const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub const DEFAULT_MAX_CONCURRENT_EVENTS: usize = 16;
pub const DEFAULT_MAX_CONCURRENT_SWEEPS: usize = 8;

// ======= Eth Rpc Client =======

/// Duration before we give up connecting to the node
pub const ETH_NODE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Duration before we timeout an HTTP request to the node
pub const ETH_HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ======= Follower registry =======

/// Duration before we timeout a request to the follower registry
pub const REGISTRY_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ======= Settings =======

pub const DEFAULT_CONFIG_PATH: &str = "config/Default.toml";
