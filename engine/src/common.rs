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

use std::{
	collections::HashMap,
	hash::Hash,
	path::Path,
	sync::{Arc, Mutex},
	time::Duration,
};

use anyhow::Context;
use tokio::time::Instant;

pub fn read_clean_and_decode_hex_str_file<V, T: FnOnce(&str) -> Result<V, anyhow::Error>>(
	file: &Path,
	context: &str,
	t: T,
) -> Result<V, anyhow::Error> {
	std::fs::read_to_string(file)
		.map_err(anyhow::Error::new)
		.with_context(|| format!("Failed to read {} file at {}", context, file.display()))
		.and_then(|string| {
			let mut str = string.as_str();
			str = str.trim();
			str = str.trim_matches(['"', '\''].as_ref());
			if let Some(stripped_str) = str.strip_prefix("0x") {
				str = stripped_str;
			}
			// Note if str is valid hex or not is determined by t()
			t(str)
		})
		.with_context(|| format!("Failed to decode {} file at {}", context, file.display()))
}

/// Makes a tick that outputs every duration and if ticks are "missed" (as tick() wasn't called
/// for some time) it will immediately output a single tick on the next call to tick() and resume
/// ticking every duration.
pub fn make_periodic_tick(duration: Duration, yield_immediately: bool) -> tokio::time::Interval {
	let mut interval = tokio::time::interval_at(
		Instant::now() + if yield_immediately { Duration::ZERO } else { duration },
		duration,
	);
	interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
	interval
}

/// An async mutex per key. Holders of the same key run one at a time, different keys don't
/// contend. Entries nobody holds or waits on are dropped when a guard is released, or on the next
/// `lock` if the last waiter gave up instead.
pub struct KeyedLock<K> {
	locks: Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>,
}

impl<K> Default for KeyedLock<K> {
	fn default() -> Self {
		Self { locks: Mutex::new(HashMap::new()) }
	}
}

pub struct KeyedLockGuard<'a, K: Eq + Hash + Clone> {
	key: K,
	owner: &'a KeyedLock<K>,
	guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl<K: Eq + Hash + Clone> KeyedLock<K> {
	pub async fn lock(&self, key: K) -> KeyedLockGuard<'_, K> {
		let mutex = {
			let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
			locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
			locks.entry(key.clone()).or_default().clone()
		};

		KeyedLockGuard { key, owner: self, guard: Some(mutex.lock_owned().await) }
	}

	#[cfg(test)]
	fn len(&self) -> usize {
		self.locks.lock().unwrap().len()
	}
}

impl<K: Eq + Hash + Clone> Drop for KeyedLockGuard<'_, K> {
	fn drop(&mut self) {
		drop(self.guard.take());
		let mut locks = self.owner.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
		// Only the map holds the mutex now, so nobody is waiting on it.
		if locks.get(&self.key).is_some_and(|mutex| Arc::strong_count(mutex) == 1) {
			locks.remove(&self.key);
		}
	}
}
