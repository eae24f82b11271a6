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

use std::{fs::OpenOptions, sync::Mutex};

use anyhow::Context;
use tracing::Subscriber;
use tracing_subscriber::{
	filter::LevelFilter, fmt, prelude::__tracing_subscriber_SubscriberExt, registry,
	util::SubscriberInitExt, EnvFilter, Layer,
};

use crate::settings;

/// Builds the subscriber: `RUST_LOG` filtering (info by default), a stdout layer, plain or json,
/// and an optional append-only file layer without colours.
pub fn build_subscriber(
	settings: &settings::Logging,
) -> anyhow::Result<impl Subscriber + Send + Sync + 'static> {
	let env_filter = EnvFilter::builder()
		.with_default_directive(LevelFilter::INFO.into())
		.from_env()
		.context("Invalid RUST_LOG directives")?;

	let stdout_layer = if settings.json {
		fmt::layer().json().boxed()
	} else {
		fmt::layer().boxed()
	};

	let file_layer = settings
		.log_file
		.as_ref()
		.map(|path| {
			OpenOptions::new()
				.create(true)
				.append(true)
				.open(path)
				.with_context(|| format!("Failed to open log file {}", path.display()))
				.map(|file| fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
		})
		.transpose()?;

	Ok(registry().with(env_filter).with(stdout_layer).with(file_layer))
}

pub fn init(settings: &settings::Logging) -> anyhow::Result<()> {
	build_subscriber(settings)?
		.try_init()
		.context("Failed to set the global tracing subscriber")
}
