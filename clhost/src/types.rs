use crate::ErrorCode;
use bitflags::bitflags;

bitflags! {
    /// 设备类型过滤器。
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
    #[repr(transparent)]
    pub struct DeviceType: u64 {
        const DEFAULT     = 1 << 0;
        const CPU         = 1 << 1;
        const GPU         = 1 << 2;
        const ACCELERATOR = 1 << 3;
        const CUSTOM      = 1 << 4;
        const ALL         = 0xFFFF_FFFF;
    }

    /// 存储对象的访问方式和分配策略。
    ///
    /// 分配策略之间按约定互斥，这里不强制。
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
    #[repr(transparent)]
    pub struct MemFlags: u64 {
        const READ_WRITE      = 1 << 0;
        const WRITE_ONLY      = 1 << 1;
        const READ_ONLY       = 1 << 2;
        const USE_HOST_PTR    = 1 << 3;
        const ALLOC_HOST_PTR  = 1 << 4;
        const COPY_HOST_PTR   = 1 << 5;
        const HOST_WRITE_ONLY = 1 << 7;
        const HOST_READ_ONLY  = 1 << 8;
        const HOST_NO_ACCESS  = 1 << 9;
    }

    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
    #[repr(transparent)]
    pub struct QueueProperties: u64 {
        const OUT_OF_ORDER_EXEC_MODE_ENABLE = 1 << 0;
        const PROFILING_ENABLE              = 1 << 1;
    }
}

impl MemFlags {
    /// 创建时需要宿主数据的分配策略。
    #[inline]
    pub fn needs_host_ptr(self) -> bool {
        self.intersects(Self::USE_HOST_PTR | Self::COPY_HOST_PTR)
    }
}

/// 命令执行状态。
///
/// 状态只会向 [`ExecStatus::Complete`] 或错误推进，到达后不再改变。
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ExecStatus {
    Queued,
    Submitted,
    Running,
    Complete,
    Error(ErrorCode),
}

impl ExecStatus {
    pub const RAW_COMPLETE: i32 = 0;
    pub const RAW_RUNNING: i32 = 1;
    pub const RAW_SUBMITTED: i32 = 2;
    pub const RAW_QUEUED: i32 = 3;

    #[inline]
    pub const fn from_raw(raw: i32) -> Self {
        match raw {
            Self::RAW_COMPLETE => Self::Complete,
            Self::RAW_RUNNING => Self::Running,
            Self::RAW_SUBMITTED => Self::Submitted,
            Self::RAW_QUEUED => Self::Queued,
            code if code < 0 => Self::Error(ErrorCode(code)),
            _ => Self::Error(ErrorCode::INVALID_VALUE),
        }
    }

    #[inline]
    pub const fn raw(self) -> i32 {
        match self {
            Self::Queued => Self::RAW_QUEUED,
            Self::Submitted => Self::RAW_SUBMITTED,
            Self::Running => Self::RAW_RUNNING,
            Self::Complete => Self::RAW_COMPLETE,
            Self::Error(code) => code.0,
        }
    }

    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error(_))
    }

    /// 是否已经到达或越过 `threshold`。错误视为越过所有状态。
    #[inline]
    pub const fn reached(self, threshold: Self) -> bool {
        self.raw() <= threshold.raw()
    }
}

/// 事件对应的命令种类，由宿主层记录。
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum CommandType {
    NdRangeKernel,
    ReadBuffer,
    WriteBuffer,
    CopyBuffer,
    FillBuffer,
    ReadImage,
    WriteImage,
    CopyImage,
    CopyImageToBuffer,
    CopyBufferToImage,
    FillImage,
    Marker,
    Barrier,
    User,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(u32)]
pub enum MemObjectType {
    Buffer = 0x10F0,
    Image2D = 0x10F1,
    Image3D = 0x10F2,
    Image2DArray = 0x10F3,
    Image1D = 0x10F4,
    Image1DArray = 0x10F5,
    Image1DBuffer = 0x10F6,
}

impl MemObjectType {
    #[inline]
    pub const fn is_image(self) -> bool {
        !matches!(self, Self::Buffer)
    }

    #[inline]
    pub const fn is_array(self) -> bool {
        matches!(self, Self::Image1DArray | Self::Image2DArray)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(u32)]
pub enum AddressingMode {
    None = 0x1130,
    ClampToEdge = 0x1131,
    Clamp = 0x1132,
    Repeat = 0x1133,
    MirroredRepeat = 0x1134,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(u32)]
pub enum FilterMode {
    Nearest = 0x1140,
    Linear = 0x1141,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(u32)]
pub enum PlatformParam {
    Profile = 0x0900,
    Version = 0x0901,
    Name = 0x0902,
    Vendor = 0x0903,
    Extensions = 0x0904,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(u32)]
pub enum DeviceParam {
    Type = 0x1000,
    MaxComputeUnits = 0x1002,
    MaxWorkItemDimensions = 0x1003,
    MaxWorkGroupSize = 0x1004,
    MaxWorkItemSizes = 0x1005,
    PreferredVectorWidthChar = 0x1006,
    PreferredVectorWidthShort = 0x1007,
    PreferredVectorWidthInt = 0x1008,
    PreferredVectorWidthLong = 0x1009,
    PreferredVectorWidthFloat = 0x100A,
    PreferredVectorWidthDouble = 0x100B,
    MaxClockFrequency = 0x100C,
    AddressBits = 0x100D,
    MaxMemAllocSize = 0x1010,
    Image2dMaxWidth = 0x1011,
    Image2dMaxHeight = 0x1012,
    Image3dMaxWidth = 0x1013,
    Image3dMaxHeight = 0x1014,
    Image3dMaxDepth = 0x1015,
    ImageSupport = 0x1016,
    GlobalMemCacheSize = 0x101E,
    GlobalMemSize = 0x101F,
    MaxConstantBufferSize = 0x1020,
    LocalMemSize = 0x1023,
    Available = 0x1027,
    Name = 0x102B,
    Vendor = 0x102C,
    DriverVersion = 0x102D,
    Profile = 0x102E,
    Version = 0x102F,
    Extensions = 0x1030,
    Platform = 0x1031,
    PreferredVectorWidthHalf = 0x1034,
    ImageMaxArraySize = 0x1041,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(u32)]
pub enum KernelParam {
    FunctionName = 0x1190,
    NumArgs = 0x1191,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(u32)]
pub enum ProfilingParam {
    Queued = 0x1280,
    Submit = 0x1281,
    Start = 0x1282,
    End = 0x1283,
}

#[test]
fn test_exec_status() {
    use ExecStatus::*;
    for status in [Queued, Submitted, Running, Complete] {
        assert_eq!(ExecStatus::from_raw(status.raw()), status);
    }
    assert!(Running.reached(Submitted));
    assert!(!Queued.reached(Submitted));
    assert!(Error(ErrorCode::OUT_OF_RESOURCES).reached(Complete));
    assert!(Error(ErrorCode::OUT_OF_RESOURCES).is_terminal());
    assert!(!Running.is_terminal());
}
