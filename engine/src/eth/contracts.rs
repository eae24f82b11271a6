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

//! The slices of the contract ABIs we touch. Only the events and functions used by the engine
//! are declared.

use ethers::prelude::abigen;

abigen!(
	LensHub,
	r#"[
		event Followed(address indexed follower, uint256[] profileIds, bytes[] followModuleDatas, uint256 timestamp)
		function followFor(uint256[] profileIds, address[] mintFor, bytes[] datas) external returns (uint256[])
	]"#
);

abigen!(
	CfaV1Forwarder,
	r#"[
		function createFlow(address token, address sender, address receiver, int96 flowrate, bytes userData) external returns (bool)
		function deleteFlow(address token, address sender, address receiver, bytes userData) external returns (bool)
	]"#
);

abigen!(
	Erc721,
	r#"[
		function balanceOf(address owner) external view returns (uint256)
	]"#
);

/// Custom errors and legacy revert strings of the Superfluid constant flow agreement.
pub mod cfa_errors {
	pub const FLOW_ALREADY_EXISTS: &str = "CFA_FLOW_ALREADY_EXISTS()";
	pub const FLOW_DOES_NOT_EXIST: &str = "CFA_FLOW_DOES_NOT_EXIST()";

	pub const LEGACY_FLOW_ALREADY_EXISTS: &str = "CFA: flow already exist";
	pub const LEGACY_FLOW_DOES_NOT_EXIST: &str = "CFA: flow does not exist";
}
