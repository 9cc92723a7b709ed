// SPDX-License-Identifier: CEPL-1.0
//! Adapter scoring and selection.

use ash::vk;

use crate::adapter::AdapterSnapshot;
use crate::error::{Error, Result};

/// Ranks adapters; the highest non-negative score wins. Negative means
/// ineligible.
pub trait DeviceScorer {
    fn score(&self, adapter: &AdapterSnapshot) -> i64;
}

impl<F> DeviceScorer for F
where
    F: Fn(&AdapterSnapshot) -> i64,
{
    fn score(&self, adapter: &AdapterSnapshot) -> i64 {
        self(adapter)
    }
}

const GIB: u64 = 1 << 30;

/// Discrete over integrated over everything else, a bonus for one queue
/// family doing both roles, plus device-local memory (100 GiB ~ 1000).
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultScorer;

impl DeviceScorer for DefaultScorer {
    fn score(&self, adapter: &AdapterSnapshot) -> i64 {
        if !adapter.queues.complete() {
            return -1;
        }
        let mut score = match adapter.device_type() {
            vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
            _ => 0,
        };
        if adapter.queues.unified() {
            score += 50;
        }
        score + memory_points(adapter.device_local_bytes())
    }
}

fn memory_points(bytes: u64) -> i64 {
    (u128::from(bytes) * 10 / u128::from(GIB)) as i64
}

/// Index of the winning adapter. `lock` filters by exact adapter name before
/// scoring; ties keep the earlier entry.
pub fn select_adapter(
    adapters: &[AdapterSnapshot],
    scorer: &dyn DeviceScorer,
    lock: Option<&str>,
) -> Result<usize> {
    let mut best: Option<(usize, i64)> = None;
    for (i, adapter) in adapters.iter().enumerate() {
        if lock.is_some_and(|name| adapter.name() != name) {
            continue;
        }
        let score = scorer.score(adapter);
        tracing::debug!("adapter {:?} scored {score}", adapter.name());
        if score < 0 {
            continue;
        }
        if best.is_none_or(|(_, top)| score > top) {
            best = Some((i, score));
        }
    }
    best.map(|(i, _)| i).ok_or(Error::NoSuitableDevice)
}
