use crate::{MemObjectType, RawHandle};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(u32)]
pub enum ChannelOrder {
    R = 0x10B0,
    A = 0x10B1,
    RG = 0x10B2,
    RA = 0x10B3,
    RGB = 0x10B4,
    RGBA = 0x10B5,
    BGRA = 0x10B6,
    ARGB = 0x10B7,
    Intensity = 0x10B8,
    Luminance = 0x10B9,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(u32)]
pub enum ChannelType {
    SnormInt8 = 0x10D0,
    SnormInt16 = 0x10D1,
    UnormInt8 = 0x10D2,
    UnormInt16 = 0x10D3,
    SignedInt8 = 0x10D7,
    SignedInt16 = 0x10D8,
    SignedInt32 = 0x10D9,
    UnsignedInt8 = 0x10DA,
    UnsignedInt16 = 0x10DB,
    UnsignedInt32 = 0x10DC,
    HalfFloat = 0x10DD,
    Float = 0x10DE,
}

impl ChannelOrder {
    pub const ALL: [Self; 10] = [
        Self::R,
        Self::A,
        Self::RG,
        Self::RA,
        Self::RGB,
        Self::RGBA,
        Self::BGRA,
        Self::ARGB,
        Self::Intensity,
        Self::Luminance,
    ];

    #[inline]
    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|it| *it as u32 == raw)
    }

    /// 每个像素中的通道，按存储顺序给出对应的 RGBA 分量下标。
    pub const fn components(self) -> &'static [usize] {
        match self {
            Self::R | Self::Intensity | Self::Luminance => &[0],
            Self::A => &[3],
            Self::RG => &[0, 1],
            Self::RA => &[0, 3],
            Self::RGB => &[0, 1, 2],
            Self::RGBA => &[0, 1, 2, 3],
            Self::BGRA => &[2, 1, 0, 3],
            Self::ARGB => &[3, 0, 1, 2],
        }
    }

    #[inline]
    pub const fn channels(self) -> usize {
        self.components().len()
    }
}

impl ChannelType {
    pub const ALL: [Self; 12] = [
        Self::SnormInt8,
        Self::SnormInt16,
        Self::UnormInt8,
        Self::UnormInt16,
        Self::SignedInt8,
        Self::SignedInt16,
        Self::SignedInt32,
        Self::UnsignedInt8,
        Self::UnsignedInt16,
        Self::UnsignedInt32,
        Self::HalfFloat,
        Self::Float,
    ];

    #[inline]
    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|it| *it as u32 == raw)
    }

    /// 单个通道的字节数。
    pub const fn size(self) -> usize {
        match self {
            Self::SnormInt8 | Self::UnormInt8 | Self::SignedInt8 | Self::UnsignedInt8 => 1,
            Self::SnormInt16
            | Self::UnormInt16
            | Self::SignedInt16
            | Self::UnsignedInt16
            | Self::HalfFloat => 2,
            Self::SignedInt32 | Self::UnsignedInt32 | Self::Float => 4,
        }
    }

    /// 读写时按归一化浮点数解释。
    #[inline]
    pub const fn is_normalized(self) -> bool {
        matches!(
            self,
            Self::SnormInt8 | Self::SnormInt16 | Self::UnormInt8 | Self::UnormInt16
        )
    }

    #[inline]
    pub const fn is_signed_int(self) -> bool {
        matches!(self, Self::SignedInt8 | Self::SignedInt16 | Self::SignedInt32)
    }

    #[inline]
    pub const fn is_unsigned_int(self) -> bool {
        matches!(
            self,
            Self::UnsignedInt8 | Self::UnsignedInt16 | Self::UnsignedInt32
        )
    }
}

/// 图像格式：通道顺序 × 通道数据类型。
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ImageFormat {
    pub order: ChannelOrder,
    pub data_type: ChannelType,
}

impl ImageFormat {
    #[inline]
    pub const fn new(order: ChannelOrder, data_type: ChannelType) -> Self {
        Self { order, data_type }
    }

    /// 像素字节数。
    #[inline]
    pub const fn pixel_size(&self) -> usize {
        self.order.channels() * self.data_type.size()
    }
}

/// 图像描述符。
///
/// 构造函数按图像类型约束维度：一维图像高和深为 1，二维图像深为 1，
/// 数组图像的层数在 `array_size` 中。
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ImageDesc {
    pub ty: MemObjectType,
    pub width: usize,
    pub height: usize,
    pub depth: usize,
    pub array_size: usize,
    pub row_pitch: usize,
    pub slice_pitch: usize,
    /// 一维缓冲图像所基于的缓冲。
    pub buffer: RawHandle,
}

impl ImageDesc {
    #[inline]
    const fn new(ty: MemObjectType, width: usize, height: usize, depth: usize, array_size: usize) -> Self {
        Self {
            ty,
            width,
            height,
            depth,
            array_size,
            row_pitch: 0,
            slice_pitch: 0,
            buffer: RawHandle::NULL,
        }
    }

    #[inline]
    pub const fn image1d(width: usize) -> Self {
        Self::new(MemObjectType::Image1D, width, 1, 1, 0)
    }

    #[inline]
    pub const fn image1d_array(width: usize, layers: usize) -> Self {
        Self::new(MemObjectType::Image1DArray, width, 1, 1, layers)
    }

    #[inline]
    pub const fn image1d_buffer(width: usize, buffer: RawHandle) -> Self {
        let mut desc = Self::new(MemObjectType::Image1DBuffer, width, 1, 1, 0);
        desc.buffer = buffer;
        desc
    }

    #[inline]
    pub const fn image2d(width: usize, height: usize) -> Self {
        Self::new(MemObjectType::Image2D, width, height, 1, 0)
    }

    #[inline]
    pub const fn image2d_array(width: usize, height: usize, layers: usize) -> Self {
        Self::new(MemObjectType::Image2DArray, width, height, 1, layers)
    }

    #[inline]
    pub const fn image3d(width: usize, height: usize, depth: usize) -> Self {
        Self::new(MemObjectType::Image3D, width, height, depth, 0)
    }

    /// 宿主数据的行距和层距，0 表示紧密排列。
    #[inline]
    pub const fn with_pitch(mut self, row_pitch: usize, slice_pitch: usize) -> Self {
        self.row_pitch = row_pitch;
        self.slice_pitch = slice_pitch;
        self
    }

    /// 覆盖整个图像的区域，数组层数折叠进高（一维数组）或深（二维数组）。
    pub const fn region(&self) -> [usize; 3] {
        use MemObjectType as Ty;
        match self.ty {
            Ty::Buffer | Ty::Image1D | Ty::Image1DBuffer => [self.width, 1, 1],
            Ty::Image1DArray => [self.width, self.array_size, 1],
            Ty::Image2D => [self.width, self.height, 1],
            Ty::Image2DArray => [self.width, self.height, self.array_size],
            Ty::Image3D => [self.width, self.height, self.depth],
        }
    }

    /// 维度是否满足图像类型的约束。
    pub const fn is_consistent(&self) -> bool {
        use MemObjectType as Ty;
        if self.width == 0 {
            return false;
        }
        match self.ty {
            Ty::Buffer => false,
            Ty::Image1D | Ty::Image1DBuffer => self.height <= 1 && self.depth <= 1,
            Ty::Image1DArray => self.height <= 1 && self.depth <= 1 && self.array_size > 0,
            Ty::Image2D => self.height > 0 && self.depth <= 1,
            Ty::Image2DArray => self.height > 0 && self.depth <= 1 && self.array_size > 0,
            Ty::Image3D => self.height > 0 && self.depth > 0,
        }
    }
}

/// 宿主数据在区域坐标 y 和 z 方向上的字节步长，溢出时返回 `None`。
///
/// 一维数组图像的层沿 y 排列，步长取层距；其他图像 y 方向取行距，z 方向取层距。
/// 距离为 0 表示紧密排列。
pub fn host_pitches(
    ty: MemObjectType,
    region: [usize; 3],
    pixel_size: usize,
    row_pitch: usize,
    slice_pitch: usize,
) -> Option<[usize; 2]> {
    let row = if row_pitch == 0 {
        region[0].checked_mul(pixel_size)?
    } else {
        row_pitch
    };
    if ty == MemObjectType::Image1DArray {
        let layer = if slice_pitch == 0 { row } else { slice_pitch };
        Some([layer, layer.checked_mul(region[1])?])
    } else {
        let slice = if slice_pitch == 0 {
            row.checked_mul(region[1])?
        } else {
            slice_pitch
        };
        Some([row, slice])
    }
}

/// 按步长排列的区域在宿主内存中至少占用的字节数，溢出时返回 `None`。
pub fn host_size(region: [usize; 3], pixel_size: usize, pitches: [usize; 2]) -> Option<usize> {
    let [x, y, z] = region;
    if x == 0 || y == 0 || z == 0 {
        return Some(0);
    }
    (z - 1)
        .checked_mul(pitches[1])?
        .checked_add((y - 1).checked_mul(pitches[0])?)?
        .checked_add(x.checked_mul(pixel_size)?)
}

#[test]
fn test_host_layout() {
    let pitches = host_pitches(MemObjectType::Image2D, [4, 3, 1], 4, 0, 0).unwrap();
    assert_eq!(pitches, [16, 48]);
    assert_eq!(host_size([4, 3, 1], 4, pitches), Some(48));

    let pitches = host_pitches(MemObjectType::Image2D, [4, 3, 1], 4, 20, 0).unwrap();
    assert_eq!(pitches, [20, 60]);
    assert_eq!(host_size([4, 3, 1], 4, pitches), Some(56));

    let pitches = host_pitches(MemObjectType::Image1DArray, [8, 2, 1], 1, 0, 10).unwrap();
    assert_eq!(pitches, [10, 20]);
    assert_eq!(host_size([8, 2, 1], 1, pitches), Some(18));

    let pitches = host_pitches(MemObjectType::Image3D, [2, 2, 2], 2, 0, 0).unwrap();
    assert_eq!(pitches, [4, 8]);
    assert_eq!(host_size([2, 2, 2], 2, pitches), Some(16));

    assert_eq!(host_pitches(MemObjectType::Image2D, [usize::MAX / 2, 1, 1], 4, 0, 0), None);
    assert_eq!(host_pitches(MemObjectType::Image1DArray, [8, 3, 1], 1, 0, usize::MAX / 2), None);
    assert_eq!(host_size([2, 2, 1], 4, [usize::MAX, usize::MAX]), None);
    assert_eq!(host_size([0, 2, 1], 4, [usize::MAX, usize::MAX]), Some(0));
}

#[test]
fn test_region() {
    assert_eq!(ImageDesc::image1d(8).region(), [8, 1, 1]);
    assert_eq!(ImageDesc::image1d_array(8, 3).region(), [8, 3, 1]);
    assert_eq!(ImageDesc::image2d(8, 4).region(), [8, 4, 1]);
    assert_eq!(ImageDesc::image2d_array(8, 4, 5).region(), [8, 4, 5]);
    assert_eq!(ImageDesc::image3d(8, 4, 2).region(), [8, 4, 2]);

    assert!(ImageDesc::image2d_array(8, 4, 5).is_consistent());
    assert!(!ImageDesc::image2d_array(8, 4, 0).is_consistent());
    assert!(!ImageDesc::image1d_array(8, 0).is_consistent());
    assert!(!ImageDesc::image2d(0, 4).is_consistent());
}

#[test]
fn test_pixel_size() {
    let rgba8 = ImageFormat::new(ChannelOrder::RGBA, ChannelType::UnormInt8);
    assert_eq!(rgba8.pixel_size(), 4);
    let rf = ImageFormat::new(ChannelOrder::R, ChannelType::Float);
    assert_eq!(rf.pixel_size(), 4);
    assert_eq!(ChannelOrder::BGRA.components(), &[2, 1, 0, 3]);
    assert_eq!(ChannelType::from_raw(0x10DD), Some(ChannelType::HalfFloat));
}
