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

pub mod contracts;
pub mod event;
pub mod rpc;

pub use rpc::{EthRpcApi, EthRpcError, EthersRpcClient};

/// Node endpoints usually carry an api key in the path or query. Keep the scheme, host and port,
/// hide the rest.
pub fn redact_endpoint_secret(endpoint: &str) -> String {
	match url::Url::parse(endpoint) {
		Ok(url) => {
			let host = url.host_str().unwrap_or_default();
			let port = url.port().map(|port| format!(":{port}")).unwrap_or_default();
			let has_secret = (url.path() != "/" && !url.path().is_empty()) || url.query().is_some();
			format!("{}://{host}{port}{}", url.scheme(), if has_secret { "/****" } else { "" })
		},
		Err(_) => "<invalid endpoint>".to_string(),
	}
}
