// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use thiserror::Error;

/// Every failure a context operation can report. Each variant maps to a
/// stable small integer, see [`Error::code`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("illegal parameters")]
    IllegalParams,
    #[error("failed to load the Vulkan driver or a required entry point")]
    LoadFailed,
    #[error("invalid configuration")]
    InvalidConfig,
    #[error("a required extension is not available")]
    MissingExtension,
    #[error("no suitable device")]
    NoSuitableDevice,
    #[error("a collaborator failed")]
    DependencyFailed,
    #[error("allocation failed")]
    AllocFailed,
    #[error("invalid internal state")]
    InvalidState,
    #[error("Vulkan error: {0:?}")]
    Api(vk::Result),
    #[error("unknown window")]
    InvalidWindow,
    #[error("no command buffer submitted")]
    NoCommandBuffer,
    #[error("timed out")]
    Timeout,
    #[error("swapchain out of date")]
    SwapchainOutOfDate,
    #[error("invalid frame state")]
    InvalidFrameState,
    #[error("attachment requested without an allocator")]
    NoAllocator,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub const SUCCESS: u32 = 0;

const NAMES: [&str; 16] = [
    "SUCCESS",
    "ILLEGAL_PARAMS",
    "LOAD_FAILED",
    "INVALID_CONFIG",
    "MISSING_EXTENSION",
    "NO_SUITABLE_DEVICE",
    "DEPENDENCY_FAILED",
    "ALLOC_FAILED",
    "INVALID_STATE",
    "VULKAN_ERROR",
    "INVALID_WINDOW",
    "NO_COMMAND_BUFFER",
    "TIMEOUT",
    "SWAPCHAIN_OUT_OF_DATE",
    "INVALID_FRAME_STATE",
    "NO_ALLOCATOR",
];

impl Error {
    pub fn code(&self) -> u32 {
        match self {
            Error::IllegalParams => 1,
            Error::LoadFailed => 2,
            Error::InvalidConfig => 3,
            Error::MissingExtension => 4,
            Error::NoSuitableDevice => 5,
            Error::DependencyFailed => 6,
            Error::AllocFailed => 7,
            Error::InvalidState => 8,
            Error::Api(_) => 9,
            Error::InvalidWindow => 10,
            Error::NoCommandBuffer => 11,
            Error::Timeout => 12,
            Error::SwapchainOutOfDate => 13,
            Error::InvalidFrameState => 14,
            Error::NoAllocator => 15,
        }
    }

    pub fn name(&self) -> &'static str {
        error_name(self.code())
    }
}

/// Name for a numeric code as returned by [`Error::code`]; 0 is success.
pub fn error_name(code: u32) -> &'static str {
    NAMES.get(code as usize).copied().unwrap_or("UNKNOWN")
}

impl From<vk::Result> for Error {
    fn from(r: vk::Result) -> Self {
        Error::Api(r)
    }
}
