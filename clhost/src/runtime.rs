use crate::{
    AddressingMode, DeviceParam, DeviceType, ErrorCode, FilterMode, ImageDesc, ImageFormat,
    KernelParam, MemFlags, MemObjectType, ObjectKind, PlatformParam, ProfilingParam,
    QueueProperties, RawHandle,
};
use std::ffi::c_void;

/// 事件状态回调，参数是触发时的原生状态值。
pub type EventCallback = Box<dyn FnOnce(i32) + Send + 'static>;

/// 原生计算运行时的接口。
///
/// 约定：
///
/// - 枚举和属性查询使用两次调用：`out` 为 `None` 时返回所需长度，
///   否则写入调用者按长度分配的缓冲；
/// - 创建调用返回句柄或状态码；
/// - 入队调用接受前驱事件句柄的平铺列表，返回新事件的句柄；
/// - 传递宿主指针的调用是 `unsafe` 的，调用者保证指针在约定期间有效。
pub trait Runtime: Send + Sync {
    /// 运行时实现的名字，用于日志。
    fn name(&self) -> &str;

    fn platform_ids(&self, out: Option<&mut [RawHandle]>) -> Result<usize, ErrorCode>;
    fn platform_info(
        &self,
        platform: RawHandle,
        param: PlatformParam,
        out: Option<&mut [u8]>,
    ) -> Result<usize, ErrorCode>;
    fn device_ids(
        &self,
        platform: RawHandle,
        ty: DeviceType,
        out: Option<&mut [RawHandle]>,
    ) -> Result<usize, ErrorCode>;
    fn device_info(
        &self,
        device: RawHandle,
        param: DeviceParam,
        out: Option<&mut [u8]>,
    ) -> Result<usize, ErrorCode>;

    fn create_context(&self, devices: &[RawHandle]) -> Result<RawHandle, ErrorCode>;
    fn supported_image_formats(
        &self,
        context: RawHandle,
        flags: MemFlags,
        ty: MemObjectType,
        out: Option<&mut [ImageFormat]>,
    ) -> Result<usize, ErrorCode>;
    fn create_command_queue(
        &self,
        context: RawHandle,
        device: RawHandle,
        properties: QueueProperties,
    ) -> Result<RawHandle, ErrorCode>;

    /// # Safety
    ///
    /// `host` 为空或指向至少 `size` 字节；带 `USE_HOST_PTR` 时须在存储对象的整个生命期内有效。
    unsafe fn create_buffer(
        &self,
        context: RawHandle,
        flags: MemFlags,
        size: usize,
        host: *mut c_void,
    ) -> Result<RawHandle, ErrorCode>;
    /// # Safety
    ///
    /// `host` 为空或覆盖按 `desc` 的行距和层距计算的整个图像。
    unsafe fn create_image(
        &self,
        context: RawHandle,
        flags: MemFlags,
        format: ImageFormat,
        desc: &ImageDesc,
        host: *mut c_void,
    ) -> Result<RawHandle, ErrorCode>;
    fn create_sampler(
        &self,
        context: RawHandle,
        normalized_coords: bool,
        addressing: AddressingMode,
        filter: FilterMode,
    ) -> Result<RawHandle, ErrorCode>;
    fn create_user_event(&self, context: RawHandle) -> Result<RawHandle, ErrorCode>;
    fn set_user_event_status(&self, event: RawHandle, status: i32) -> Result<(), ErrorCode>;

    fn create_program_with_source(
        &self,
        context: RawHandle,
        source: &str,
    ) -> Result<RawHandle, ErrorCode>;
    /// 外部编译器的唯一入口：为指定设备编译并链接程序。
    fn build_program(
        &self,
        program: RawHandle,
        devices: &[RawHandle],
        options: &str,
    ) -> Result<(), ErrorCode>;
    fn program_build_log(
        &self,
        program: RawHandle,
        device: RawHandle,
        out: Option<&mut [u8]>,
    ) -> Result<usize, ErrorCode>;
    /// 以 `;` 分隔的核函数名。
    fn program_kernel_names(
        &self,
        program: RawHandle,
        out: Option<&mut [u8]>,
    ) -> Result<usize, ErrorCode>;
    fn create_kernel(&self, program: RawHandle, name: &str) -> Result<RawHandle, ErrorCode>;
    fn kernel_info(
        &self,
        kernel: RawHandle,
        param: KernelParam,
        out: Option<&mut [u8]>,
    ) -> Result<usize, ErrorCode>;
    /// # Safety
    ///
    /// `value` 为空或指向 `size` 字节，调用返回后不再被引用。
    unsafe fn set_kernel_arg(
        &self,
        kernel: RawHandle,
        index: u32,
        size: usize,
        value: *const c_void,
    ) -> Result<(), ErrorCode>;

    fn enqueue_nd_range_kernel(
        &self,
        queue: RawHandle,
        kernel: RawHandle,
        range: &NdRange,
        wait: &[RawHandle],
    ) -> Result<RawHandle, ErrorCode>;
    /// # Safety
    ///
    /// `dst` 指向至少 `size` 字节；非阻塞时须在返回的事件完成前保持有效且不被访问。
    #[allow(clippy::too_many_arguments)]
    unsafe fn enqueue_read_buffer(
        &self,
        queue: RawHandle,
        buffer: RawHandle,
        blocking: bool,
        offset: usize,
        size: usize,
        dst: *mut c_void,
        wait: &[RawHandle],
    ) -> Result<RawHandle, ErrorCode>;
    /// # Safety
    ///
    /// `src` 指向至少 `size` 字节；非阻塞时须在返回的事件完成前保持有效且不被修改。
    #[allow(clippy::too_many_arguments)]
    unsafe fn enqueue_write_buffer(
        &self,
        queue: RawHandle,
        buffer: RawHandle,
        blocking: bool,
        offset: usize,
        size: usize,
        src: *const c_void,
        wait: &[RawHandle],
    ) -> Result<RawHandle, ErrorCode>;
    /// # Safety
    ///
    /// `dst` 覆盖按行距和层距计算的整个区域；非阻塞时要求同 [`Runtime::enqueue_read_buffer`]。
    #[allow(clippy::too_many_arguments)]
    unsafe fn enqueue_read_image(
        &self,
        queue: RawHandle,
        image: RawHandle,
        blocking: bool,
        origin: [usize; 3],
        region: [usize; 3],
        row_pitch: usize,
        slice_pitch: usize,
        dst: *mut c_void,
        wait: &[RawHandle],
    ) -> Result<RawHandle, ErrorCode>;
    /// # Safety
    ///
    /// `src` 覆盖按行距和层距计算的整个区域；非阻塞时要求同 [`Runtime::enqueue_write_buffer`]。
    #[allow(clippy::too_many_arguments)]
    unsafe fn enqueue_write_image(
        &self,
        queue: RawHandle,
        image: RawHandle,
        blocking: bool,
        origin: [usize; 3],
        region: [usize; 3],
        row_pitch: usize,
        slice_pitch: usize,
        src: *const c_void,
        wait: &[RawHandle],
    ) -> Result<RawHandle, ErrorCode>;
    #[allow(clippy::too_many_arguments)]
    fn enqueue_copy_buffer(
        &self,
        queue: RawHandle,
        src: RawHandle,
        dst: RawHandle,
        src_offset: usize,
        dst_offset: usize,
        size: usize,
        wait: &[RawHandle],
    ) -> Result<RawHandle, ErrorCode>;
    #[allow(clippy::too_many_arguments)]
    fn enqueue_copy_image(
        &self,
        queue: RawHandle,
        src: RawHandle,
        dst: RawHandle,
        src_origin: [usize; 3],
        dst_origin: [usize; 3],
        region: [usize; 3],
        wait: &[RawHandle],
    ) -> Result<RawHandle, ErrorCode>;
    #[allow(clippy::too_many_arguments)]
    fn enqueue_copy_image_to_buffer(
        &self,
        queue: RawHandle,
        src: RawHandle,
        dst: RawHandle,
        src_origin: [usize; 3],
        region: [usize; 3],
        dst_offset: usize,
        wait: &[RawHandle],
    ) -> Result<RawHandle, ErrorCode>;
    #[allow(clippy::too_many_arguments)]
    fn enqueue_copy_buffer_to_image(
        &self,
        queue: RawHandle,
        src: RawHandle,
        dst: RawHandle,
        src_offset: usize,
        dst_origin: [usize; 3],
        region: [usize; 3],
        wait: &[RawHandle],
    ) -> Result<RawHandle, ErrorCode>;
    fn enqueue_fill_buffer(
        &self,
        queue: RawHandle,
        buffer: RawHandle,
        pattern: &[u8],
        offset: usize,
        size: usize,
        wait: &[RawHandle],
    ) -> Result<RawHandle, ErrorCode>;
    fn enqueue_fill_image(
        &self,
        queue: RawHandle,
        image: RawHandle,
        color: FillColor,
        origin: [usize; 3],
        region: [usize; 3],
        wait: &[RawHandle],
    ) -> Result<RawHandle, ErrorCode>;
    fn enqueue_marker(&self, queue: RawHandle, wait: &[RawHandle]) -> Result<RawHandle, ErrorCode>;
    fn enqueue_barrier(&self, queue: RawHandle, wait: &[RawHandle])
        -> Result<RawHandle, ErrorCode>;
    fn flush(&self, queue: RawHandle) -> Result<(), ErrorCode>;
    fn finish(&self, queue: RawHandle) -> Result<(), ErrorCode>;

    fn wait_for_events(&self, events: &[RawHandle]) -> Result<(), ErrorCode>;
    fn event_status(&self, event: RawHandle) -> Result<i32, ErrorCode>;
    /// 事件状态到达或越过 `threshold` 时在运行时管理的线程上调用 `callback`。
    fn set_event_callback(
        &self,
        event: RawHandle,
        threshold: i32,
        callback: EventCallback,
    ) -> Result<(), ErrorCode>;
    fn event_profiling(&self, event: RawHandle, param: ProfilingParam) -> Result<u64, ErrorCode>;

    fn release(&self, kind: ObjectKind, handle: RawHandle) -> Result<(), ErrorCode>;
}

/// 核函数的工作划分。
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct NdRange {
    pub work_dim: u32,
    pub global: [usize; 3],
    pub offset: Option<[usize; 3]>,
    pub local: Option<[usize; 3]>,
}

impl NdRange {
    /// 以全局尺寸构造，维数即切片长度。超过 3 维的部分被截断，维数保持原值以便运行时拒绝。
    pub fn new(global: &[usize]) -> Self {
        Self {
            work_dim: global.len() as _,
            global: fill3(global),
            offset: None,
            local: None,
        }
    }

    #[inline]
    pub fn offset(mut self, offset: &[usize]) -> Self {
        let mut ans = fill3(offset);
        for x in &mut ans[offset.len().min(3)..] {
            *x = 0
        }
        self.offset = Some(ans);
        self
    }

    #[inline]
    pub fn local(mut self, local: &[usize]) -> Self {
        self.local = Some(fill3(local));
        self
    }

    /// 总工作项数。
    #[inline]
    pub fn items(&self) -> usize {
        self.global.iter().product()
    }
}

fn fill3(vals: &[usize]) -> [usize; 3] {
    let mut ans = [1; 3];
    for (dst, src) in ans.iter_mut().zip(vals) {
        *dst = *src
    }
    ans
}

/// 图像填充颜色，按图像通道类型选择变体：归一化和浮点用 `Float`，有符号整数用 `Int`，无符号整数用 `Uint`。
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum FillColor {
    Float([f32; 4]),
    Int([i32; 4]),
    Uint([u32; 4]),
}

impl FillColor {
    /// 原生调用使用的 16 字节表示。
    pub fn to_bytes(self) -> [u8; 16] {
        let mut ans = [0u8; 16];
        for (i, chunk) in ans.chunks_exact_mut(4).enumerate() {
            let bytes = match self {
                Self::Float(v) => v[i].to_ne_bytes(),
                Self::Int(v) => v[i].to_ne_bytes(),
                Self::Uint(v) => v[i].to_ne_bytes(),
            };
            chunk.copy_from_slice(&bytes)
        }
        ans
    }
}

#[test]
fn test_nd_range() {
    let range = NdRange::new(&[16, 4]).offset(&[2]).local(&[4, 2]);
    assert_eq!(range.work_dim, 2);
    assert_eq!(range.global, [16, 4, 1]);
    assert_eq!(range.offset, Some([2, 0, 0]));
    assert_eq!(range.local, Some([4, 2, 1]));
    assert_eq!(range.items(), 64);

    assert_eq!(NdRange::new(&[1, 2, 3, 4]).work_dim, 4);
    assert_eq!(NdRange::new(&[]).work_dim, 0);
}
