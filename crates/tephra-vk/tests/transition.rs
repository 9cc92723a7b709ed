// SPDX-License-Identifier: CEPL-1.0
use rstest::rstest;
use tephra_vk::transition::{layout_access, transition};
use tephra_vk::vk::{self, Handle};
use tephra_vk::{AttachmentInstance, BarrierRecorder};

#[derive(Default)]
struct Recorded {
    barriers: Vec<(vk::PipelineStageFlags, vk::PipelineStageFlags, vk::ImageLayout, vk::ImageLayout)>,
}

impl BarrierRecorder for Recorded {
    fn image_barrier(
        &mut self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barrier: &vk::ImageMemoryBarrier<'_>,
    ) {
        self.barriers
            .push((src_stage, dst_stage, barrier.old_layout, barrier.new_layout));
    }
}

fn color_instance() -> AttachmentInstance {
    AttachmentInstance {
        image: vk::Image::from_raw(1),
        view: vk::ImageView::from_raw(2),
        allocation: None,
        layout: vk::ImageLayout::UNDEFINED,
    }
}

#[rstest]
#[case(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)]
#[case(vk::ImageLayout::TRANSFER_DST_OPTIMAL)]
#[case(vk::ImageLayout::PRESENT_SRC_KHR)]
fn second_call_is_a_no_op(#[case] target: vk::ImageLayout) {
    let mut inst = color_instance();
    let mut rec = Recorded::default();
    assert!(transition(&mut inst, vk::ImageAspectFlags::COLOR, target, &mut rec));
    assert!(!transition(&mut inst, vk::ImageAspectFlags::COLOR, target, &mut rec));
    assert_eq!(rec.barriers.len(), 1);
    assert_eq!(inst.layout, target);
}

#[test]
fn frame_sequence_uses_table_stages() {
    let mut inst = color_instance();
    let mut rec = Recorded::default();
    let aspect = vk::ImageAspectFlags::COLOR;
    transition(&mut inst, aspect, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, &mut rec);
    transition(&mut inst, aspect, vk::ImageLayout::PRESENT_SRC_KHR, &mut rec);
    assert_eq!(
        rec.barriers,
        vec![
            (
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            ),
            (
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::ImageLayout::PRESENT_SRC_KHR,
            ),
        ]
    );
}

#[test]
fn access_masks() {
    let (_, access) = layout_access(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    assert_eq!(access, vk::AccessFlags::SHADER_READ);
    let (stage, access) = layout_access(vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
    assert_eq!(stage, vk::PipelineStageFlags::TRANSFER);
    assert_eq!(access, vk::AccessFlags::TRANSFER_READ);
    let (_, access) = layout_access(vk::ImageLayout::PRESENT_SRC_KHR);
    assert!(access.is_empty());
}
