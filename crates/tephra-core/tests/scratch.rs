// SPDX-License-Identifier: CEPL-1.0
use rstest::rstest;
use tephra_core::ScratchArena;

#[rstest]
#[case(1)]
#[case(3)]
#[case(8)]
fn nested_checkpoints_unwind_in_order(#[case] depth: usize) {
    fn descend(arena: &ScratchArena, remaining: usize, marks: &mut Vec<usize>) {
        if remaining == 0 {
            return;
        }
        let cp = arena.checkpoint();
        let _ = cp.alloc_slice_copy(&[0u16; 5]);
        marks.push(arena.in_use());
        descend(arena, remaining - 1, marks);
        assert_eq!(arena.in_use(), *marks.last().unwrap());
        marks.pop();
    }

    let arena = ScratchArena::with_capacity(1024);
    let mut marks = Vec::new();
    descend(&arena, depth, &mut marks);
    assert_eq!(arena.in_use(), 0);
}

#[test]
fn parent_allocations_survive_child_release() {
    let arena = ScratchArena::with_capacity(512);
    let outer = arena.checkpoint();
    let names = outer.alloc_iter(["VK_KHR_surface", "VK_EXT_debug_utils"]);
    {
        let inner = arena.checkpoint();
        let _ = inner.alloc_slice_copy(&[0xffu8; 64]);
    }
    assert_eq!(names, &["VK_KHR_surface", "VK_EXT_debug_utils"]);
    let more = outer.alloc_slice_copy(&[1u32]);
    assert_eq!(more, &[1]);
}

#[test]
#[should_panic(expected = "exhausted")]
fn exhaustion_is_fatal() {
    let arena = ScratchArena::with_capacity(16);
    let cp = arena.checkpoint();
    let _ = cp.alloc_slice_copy(&[0u64; 4]);
}

#[test]
#[should_panic(expected = "nested checkpoint")]
fn outer_checkpoint_cannot_allocate_while_inner_is_open() {
    let arena = ScratchArena::with_capacity(128);
    let outer = arena.checkpoint();
    let _inner = arena.checkpoint();
    let _ = outer.alloc_slice_copy(&[1u8]);
}

#[test]
fn empty_allocations_take_no_space() {
    let arena = ScratchArena::with_capacity(8);
    let cp = arena.checkpoint();
    let none: &[u32] = cp.alloc_slice_copy(&[]);
    assert!(none.is_empty());
    assert_eq!(cp.used(), 0);
}
