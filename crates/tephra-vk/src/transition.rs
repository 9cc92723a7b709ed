// SPDX-License-Identifier: CEPL-1.0
//! Layout tracking for attachment instances.

use ash::vk;

use crate::attachment::{subresource, AttachmentInstance};

/// Sink for image barriers. The context records into a command buffer;
/// tests record into a list.
pub trait BarrierRecorder {
    fn image_barrier(
        &mut self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barrier: &vk::ImageMemoryBarrier<'_>,
    );
}

/// Records straight into a command buffer in the recording state.
pub struct CommandBufferRecorder<'a> {
    device: &'a ash::Device,
    cmd: vk::CommandBuffer,
}

impl<'a> CommandBufferRecorder<'a> {
    /// # Safety
    /// `cmd` must be a command buffer of `device` in the recording state.
    pub unsafe fn new(device: &'a ash::Device, cmd: vk::CommandBuffer) -> Self {
        Self { device, cmd }
    }
}

impl BarrierRecorder for CommandBufferRecorder<'_> {
    fn image_barrier(
        &mut self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barrier: &vk::ImageMemoryBarrier<'_>,
    ) {
        // SAFETY: guaranteed by `CommandBufferRecorder::new`.
        unsafe {
            self.device.cmd_pipeline_barrier(
                self.cmd,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(barrier),
            );
        }
    }
}

/// Stage and access an image in `layout` is used with.
pub fn layout_access(layout: vk::ImageLayout) -> (vk::PipelineStageFlags, vk::AccessFlags) {
    match layout {
        vk::ImageLayout::UNDEFINED => {
            (vk::PipelineStageFlags::TOP_OF_PIPE, vk::AccessFlags::empty())
        }
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => (
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ),
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => (
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => (
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::AccessFlags::SHADER_READ,
        ),
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => (
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_READ,
        ),
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => (
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_WRITE,
        ),
        vk::ImageLayout::PRESENT_SRC_KHR => {
            (vk::PipelineStageFlags::BOTTOM_OF_PIPE, vk::AccessFlags::empty())
        }
        _ => (vk::PipelineStageFlags::ALL_COMMANDS, vk::AccessFlags::empty()),
    }
}

/// Move `instance` to `target`. Emits one barrier and returns true, or
/// does nothing if it is already there.
pub fn transition(
    instance: &mut AttachmentInstance,
    aspect: vk::ImageAspectFlags,
    target: vk::ImageLayout,
    recorder: &mut dyn BarrierRecorder,
) -> bool {
    if instance.layout == target {
        return false;
    }
    let (src_stage, src_access) = layout_access(instance.layout);
    let (dst_stage, dst_access) = layout_access(target);
    let barrier = vk::ImageMemoryBarrier {
        src_access_mask: src_access,
        dst_access_mask: dst_access,
        old_layout: instance.layout,
        new_layout: target,
        src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        image: instance.image,
        subresource_range: subresource(aspect),
        ..Default::default()
    };
    recorder.image_barrier(src_stage, dst_stage, &barrier);
    instance.layout = target;
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_edges() {
        assert_eq!(
            layout_access(vk::ImageLayout::UNDEFINED),
            (vk::PipelineStageFlags::TOP_OF_PIPE, vk::AccessFlags::empty())
        );
        assert_eq!(
            layout_access(vk::ImageLayout::GENERAL),
            (vk::PipelineStageFlags::ALL_COMMANDS, vk::AccessFlags::empty())
        );
        let (stage, _) = layout_access(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
        assert!(stage.contains(vk::PipelineStageFlags::LATE_FRAGMENT_TESTS));
    }
}
