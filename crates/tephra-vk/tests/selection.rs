// SPDX-License-Identifier: CEPL-1.0
use rstest::rstest;
use tephra_vk::vk;
use tephra_vk::{select_adapter, AdapterSnapshot, DefaultScorer, DeviceScorer, Error, QueueRoles};

const GIB: u64 = 1 << 30;

fn adapter(name: &str, ty: vk::PhysicalDeviceType, local: u64, queues: QueueRoles) -> AdapterSnapshot {
    let mut a = AdapterSnapshot::default();
    a.properties.device_type = ty;
    for (dst, src) in a.properties.device_name.iter_mut().zip(name.bytes()) {
        *dst = src as std::ffi::c_char;
    }
    a.memory.memory_heap_count = 1;
    a.memory.memory_heaps[0] = vk::MemoryHeap {
        size: local,
        flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
    };
    a.queues = queues;
    a
}

fn unified() -> QueueRoles {
    QueueRoles {
        graphics: Some(0),
        present: Some(0),
    }
}

#[rstest]
#[case(vk::PhysicalDeviceType::DISCRETE_GPU, vk::PhysicalDeviceType::INTEGRATED_GPU)]
#[case(vk::PhysicalDeviceType::INTEGRATED_GPU, vk::PhysicalDeviceType::CPU)]
#[case(vk::PhysicalDeviceType::INTEGRATED_GPU, vk::PhysicalDeviceType::VIRTUAL_GPU)]
fn device_type_orders_scores(#[case] better: vk::PhysicalDeviceType, #[case] worse: vk::PhysicalDeviceType) {
    let a = adapter("a", better, 4 * GIB, unified());
    let b = adapter("b", worse, 4 * GIB, unified());
    assert!(DefaultScorer.score(&a) > DefaultScorer.score(&b));
}

#[rstest]
#[case(0, 1)]
#[case(GIB, 2 * GIB)]
#[case(8 * GIB, 8 * GIB + 1)]
#[case(24 * GIB, 100 * GIB)]
fn more_memory_never_scores_lower(#[case] less: u64, #[case] more: u64) {
    let a = adapter("a", vk::PhysicalDeviceType::DISCRETE_GPU, less, unified());
    let b = adapter("b", vk::PhysicalDeviceType::DISCRETE_GPU, more, unified());
    assert!(DefaultScorer.score(&b) >= DefaultScorer.score(&a));
}

#[test]
fn hundred_gib_is_worth_a_thousand() {
    let small = adapter("a", vk::PhysicalDeviceType::CPU, 0, unified());
    let big = adapter("b", vk::PhysicalDeviceType::CPU, 100 * GIB, unified());
    assert_eq!(DefaultScorer.score(&big) - DefaultScorer.score(&small), 1000);
}

#[test]
fn unified_queue_bonus() {
    let split = QueueRoles {
        graphics: Some(0),
        present: Some(1),
    };
    let a = adapter("a", vk::PhysicalDeviceType::INTEGRATED_GPU, 0, unified());
    let b = adapter("b", vk::PhysicalDeviceType::INTEGRATED_GPU, 0, split);
    assert_eq!(DefaultScorer.score(&a) - DefaultScorer.score(&b), 50);
}

#[test]
fn discrete_wins_over_software_fallback() {
    let adapters = [
        adapter("llvmpipe", vk::PhysicalDeviceType::CPU, 16 * GIB, unified()),
        adapter("Radeon", vk::PhysicalDeviceType::DISCRETE_GPU, 8 * GIB, unified()),
    ];
    assert!(DefaultScorer.score(&adapters[0]) <= 1000);
    assert!(DefaultScorer.score(&adapters[1]) >= 1000);
    assert_eq!(select_adapter(&adapters, &DefaultScorer, None), Ok(1));
}

#[test]
fn all_ineligible_fails() {
    let broken = QueueRoles {
        graphics: None,
        present: Some(0),
    };
    let adapters = [
        adapter("a", vk::PhysicalDeviceType::DISCRETE_GPU, 8 * GIB, broken),
        adapter("b", vk::PhysicalDeviceType::INTEGRATED_GPU, GIB, broken),
    ];
    assert_eq!(
        select_adapter(&adapters, &DefaultScorer, None),
        Err(Error::NoSuitableDevice)
    );
}

#[test]
fn name_lock_beats_a_higher_score() {
    let adapters = [
        adapter("Radeon", vk::PhysicalDeviceType::DISCRETE_GPU, 8 * GIB, unified()),
        adapter("llvmpipe", vk::PhysicalDeviceType::CPU, GIB, unified()),
    ];
    assert_eq!(
        select_adapter(&adapters, &DefaultScorer, Some("llvmpipe")),
        Ok(1)
    );
}

#[test]
fn custom_scorer_can_reject_everything() {
    let adapters = [adapter("a", vk::PhysicalDeviceType::DISCRETE_GPU, GIB, unified())];
    let never = |_: &AdapterSnapshot| -1i64;
    assert_eq!(
        select_adapter(&adapters, &never, None),
        Err(Error::NoSuitableDevice)
    );
}
