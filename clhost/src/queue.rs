use crate::{
    error::{
        functions::{precondition, status},
        LastError,
    },
    format::{host_pitches, host_size},
    handle::Owned,
    Buffer, CommandType, Context, Device, Error, ErrorCode, Event, FillColor, Image, Kernel,
    MemObject, NdRange, ObjectKind, QueueProperties, RawHandle, Runtime,
};
use bytemuck::Pod;
use log::trace;
use std::{
    ffi::c_void,
    fmt,
    mem::{size_of, size_of_val},
};

/// 命令队列。
///
/// 队列不保存排序状态，命令的先后由队列模式、等待列表、标记和屏障决定，全部交给运行时。
pub struct CommandQueue<'ctx> {
    ctx: &'ctx Context,
    handle: Owned,
    device: Device,
    properties: QueueProperties,
    last_error: LastError,
}

impl<'ctx> CommandQueue<'ctx> {
    pub(crate) fn new(
        ctx: &'ctx Context,
        raw: RawHandle,
        device: Device,
        properties: QueueProperties,
    ) -> Self {
        Self {
            ctx,
            handle: Owned::new(ctx.runtime().clone(), ObjectKind::CommandQueue, raw),
            device,
            properties,
            last_error: LastError::default(),
        }
    }

    #[inline]
    pub fn raw(&self) -> RawHandle {
        self.handle.raw()
    }

    #[inline]
    pub fn context(&self) -> &'ctx Context {
        self.ctx
    }

    #[inline]
    pub fn device(&self) -> &Device {
        &self.device
    }

    #[inline]
    pub fn properties(&self) -> QueueProperties {
        self.properties
    }

    #[inline]
    pub fn is_out_of_order(&self) -> bool {
        self.properties
            .contains(QueueProperties::OUT_OF_ORDER_EXEC_MODE_ENABLE)
    }

    #[inline]
    pub fn last_error(&self) -> ErrorCode {
        self.last_error.get()
    }

    pub fn release(&self) -> Result<(), Error> {
        let result = self.handle.release();
        self.last_error.record("release command queue", result)
    }

    fn submit(
        &self,
        command: CommandType,
        wait: &[&Event],
        f: impl FnOnce(&dyn Runtime, RawHandle, &[RawHandle]) -> Result<RawHandle, ErrorCode>,
    ) -> Result<Event<'ctx>, Error> {
        let wait = wait.iter().map(|e| e.raw()).collect::<Vec<_>>();
        trace!("enqueue {command:?} after {wait:?}");
        let result = f(&**self.ctx.runtime(), self.raw(), &wait);
        let raw = self.last_error.record(&format!("enqueue {command:?}"), result)?;
        Ok(Event::new(self.ctx, raw, Some(self.raw()), command))
    }

    /// 发射核函数。参数在入队时被捕获，之后重新绑定不影响这次执行。
    pub fn enqueue_kernel(
        &self,
        kernel: &Kernel,
        range: &NdRange,
        wait: &[&Event],
    ) -> Result<Event<'ctx>, Error> {
        self.submit(CommandType::NdRangeKernel, wait, |rt, q, wait| {
            rt.enqueue_nd_range_kernel(q, kernel.raw(), range, wait)
        })
    }

    /// 阻塞地从缓冲的第 `offset` 个元素开始读取 `dst.len()` 个元素。
    pub fn read_buffer<T: Pod>(
        &self,
        buffer: &Buffer<T>,
        offset: usize,
        dst: &mut [T],
        wait: &[&Event],
    ) -> Result<Event<'ctx>, Error> {
        unsafe { self.enqueue_read_buffer(buffer, true, offset, dst, wait) }
    }

    /// 阻塞地向缓冲的第 `offset` 个元素开始写入 `src`。
    pub fn write_buffer<T: Pod>(
        &self,
        buffer: &Buffer<T>,
        offset: usize,
        src: &[T],
        wait: &[&Event],
    ) -> Result<Event<'ctx>, Error> {
        unsafe { self.enqueue_write_buffer(buffer, true, offset, src, wait) }
    }

    /// # Safety
    ///
    /// 非阻塞时，`dst` 在返回的事件完成之前不得被访问或释放。
    pub unsafe fn enqueue_read_buffer<T: Pod>(
        &self,
        buffer: &Buffer<T>,
        blocking: bool,
        offset: usize,
        dst: &mut [T],
        wait: &[&Event],
    ) -> Result<Event<'ctx>, Error> {
        let offset = self.bytes::<T>(offset)?;
        let ptr = dst.as_mut_ptr().cast::<c_void>();
        let size = size_of_val(dst);
        self.submit(CommandType::ReadBuffer, wait, |rt, q, wait| {
            rt.enqueue_read_buffer(q, buffer.raw(), blocking, offset, size, ptr, wait)
        })
    }

    /// # Safety
    ///
    /// 非阻塞时，`src` 在返回的事件完成之前不得被修改或释放。
    pub unsafe fn enqueue_write_buffer<T: Pod>(
        &self,
        buffer: &Buffer<T>,
        blocking: bool,
        offset: usize,
        src: &[T],
        wait: &[&Event],
    ) -> Result<Event<'ctx>, Error> {
        let offset = self.bytes::<T>(offset)?;
        self.submit(CommandType::WriteBuffer, wait, |rt, q, wait| {
            let ptr = src.as_ptr().cast();
            rt.enqueue_write_buffer(q, buffer.raw(), blocking, offset, size_of_val(src), ptr, wait)
        })
    }

    /// 阻塞地读取图像区域，`dst` 紧密排列。
    pub fn read_image<T: Pod>(
        &self,
        image: &Image,
        origin: [usize; 3],
        region: [usize; 3],
        dst: &mut [T],
        wait: &[&Event],
    ) -> Result<Event<'ctx>, Error> {
        unsafe { self.enqueue_read_image(image, true, origin, region, [0, 0], dst, wait) }
    }

    /// 阻塞地写入图像区域，`src` 紧密排列。
    pub fn write_image<T: Pod>(
        &self,
        image: &Image,
        origin: [usize; 3],
        region: [usize; 3],
        src: &[T],
        wait: &[&Event],
    ) -> Result<Event<'ctx>, Error> {
        unsafe { self.enqueue_write_image(image, true, origin, region, [0, 0], src, wait) }
    }

    /// `n` 个 `T` 的字节数。
    fn bytes<T>(&self, n: usize) -> Result<usize, Error> {
        match n.checked_mul(size_of::<T>()) {
            Some(size) => Ok(size),
            None => self.last_error.fail(status(
                ErrorCode::INVALID_VALUE,
                format!("{n} items of {} bytes", size_of::<T>()),
            )),
        }
    }

    fn check_host_size(
        &self,
        image: &Image,
        region: [usize; 3],
        pitch: [usize; 2],
        len: usize,
    ) -> Result<(), Error> {
        let pixel = image.pixel_size();
        let Some(need) = host_pitches(image.object_type(), region, pixel, pitch[0], pitch[1])
            .and_then(|pitches| host_size(region, pixel, pitches))
        else {
            return self.last_error.fail(status(
                ErrorCode::INVALID_VALUE,
                format!("image region {region:?} overflows host memory"),
            ));
        };
        if len < need {
            self.last_error.fail(precondition(format!(
                "image region needs {need} bytes of host memory, {len} given"
            )))
        } else {
            Ok(())
        }
    }

    /// `pitch` 是宿主数据的行距和层距，0 表示紧密排列。
    ///
    /// # Safety
    ///
    /// 非阻塞时，`dst` 在返回的事件完成之前不得被访问或释放。
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn enqueue_read_image<T: Pod>(
        &self,
        image: &Image,
        blocking: bool,
        origin: [usize; 3],
        region: [usize; 3],
        pitch: [usize; 2],
        dst: &mut [T],
        wait: &[&Event],
    ) -> Result<Event<'ctx>, Error> {
        self.check_host_size(image, region, pitch, size_of_val(dst))?;
        let ptr = dst.as_mut_ptr().cast::<c_void>();
        self.submit(CommandType::ReadImage, wait, |rt, q, wait| {
            let [row, slice] = pitch;
            rt.enqueue_read_image(q, image.raw(), blocking, origin, region, row, slice, ptr, wait)
        })
    }

    /// `pitch` 是宿主数据的行距和层距，0 表示紧密排列。
    ///
    /// # Safety
    ///
    /// 非阻塞时，`src` 在返回的事件完成之前不得被修改或释放。
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn enqueue_write_image<T: Pod>(
        &self,
        image: &Image,
        blocking: bool,
        origin: [usize; 3],
        region: [usize; 3],
        pitch: [usize; 2],
        src: &[T],
        wait: &[&Event],
    ) -> Result<Event<'ctx>, Error> {
        self.check_host_size(image, region, pitch, size_of_val(src))?;
        self.submit(CommandType::WriteImage, wait, |rt, q, wait| {
            let [row, slice] = pitch;
            let ptr = src.as_ptr().cast();
            rt.enqueue_write_image(q, image.raw(), blocking, origin, region, row, slice, ptr, wait)
        })
    }

    /// 复制 `len` 个元素，缺省时复制到源缓冲末尾。偏移以元素计。
    pub fn copy_buffer<T: Pod>(
        &self,
        src: &Buffer<T>,
        dst: &Buffer<T>,
        src_offset: usize,
        dst_offset: usize,
        len: Option<usize>,
        wait: &[&Event],
    ) -> Result<Event<'ctx>, Error> {
        let len = len.unwrap_or(src.len().saturating_sub(src_offset));
        let src_offset = self.bytes::<T>(src_offset)?;
        let dst_offset = self.bytes::<T>(dst_offset)?;
        let size = self.bytes::<T>(len)?;
        self.submit(CommandType::CopyBuffer, wait, |rt, q, wait| {
            rt.enqueue_copy_buffer(q, src.raw(), dst.raw(), src_offset, dst_offset, size, wait)
        })
    }

    /// 在图像之间复制区域，缺省时复制到源图像的边界。
    pub fn copy_image(
        &self,
        src: &Image,
        dst: &Image,
        src_origin: [usize; 3],
        dst_origin: [usize; 3],
        region: Option<[usize; 3]>,
        wait: &[&Event],
    ) -> Result<Event<'ctx>, Error> {
        let region = region.unwrap_or(remaining(src.region(), src_origin));
        self.submit(CommandType::CopyImage, wait, |rt, q, wait| {
            rt.enqueue_copy_image(q, src.raw(), dst.raw(), src_origin, dst_origin, region, wait)
        })
    }

    /// 把图像区域紧密排列地复制到缓冲的第 `dst_offset` 个元素处。
    pub fn copy_image_to_buffer<T: Pod>(
        &self,
        src: &Image,
        dst: &Buffer<T>,
        src_origin: [usize; 3],
        region: Option<[usize; 3]>,
        dst_offset: usize,
        wait: &[&Event],
    ) -> Result<Event<'ctx>, Error> {
        let region = region.unwrap_or(remaining(src.region(), src_origin));
        let offset = self.bytes::<T>(dst_offset)?;
        self.submit(CommandType::CopyImageToBuffer, wait, |rt, q, wait| {
            rt.enqueue_copy_image_to_buffer(q, src.raw(), dst.raw(), src_origin, region, offset, wait)
        })
    }

    /// 从缓冲的第 `src_offset` 个元素开始，把紧密排列的数据复制到图像区域，缺省时覆盖到图像的边界。
    pub fn copy_buffer_to_image<T: Pod>(
        &self,
        src: &Buffer<T>,
        dst: &Image,
        src_offset: usize,
        dst_origin: [usize; 3],
        region: Option<[usize; 3]>,
        wait: &[&Event],
    ) -> Result<Event<'ctx>, Error> {
        let region = region.unwrap_or(remaining(dst.region(), dst_origin));
        let offset = self.bytes::<T>(src_offset)?;
        self.submit(CommandType::CopyBufferToImage, wait, |rt, q, wait| {
            rt.enqueue_copy_buffer_to_image(q, src.raw(), dst.raw(), offset, dst_origin, region, wait)
        })
    }

    /// 从第 `offset` 个元素开始，用 `pattern` 重复填充 `len` 个元素。
    ///
    /// 模式长度应当整除填充长度，这一点由运行时检查。
    pub fn fill_buffer<T: Pod>(
        &self,
        buffer: &Buffer<T>,
        pattern: &[T],
        offset: usize,
        len: usize,
        wait: &[&Event],
    ) -> Result<Event<'ctx>, Error> {
        let offset = self.bytes::<T>(offset)?;
        let size = self.bytes::<T>(len)?;
        let pattern = bytemuck::cast_slice(pattern);
        self.submit(CommandType::FillBuffer, wait, |rt, q, wait| {
            rt.enqueue_fill_buffer(q, buffer.raw(), pattern, offset, size, wait)
        })
    }

    pub fn fill_image(
        &self,
        image: &Image,
        color: FillColor,
        origin: [usize; 3],
        region: [usize; 3],
        wait: &[&Event],
    ) -> Result<Event<'ctx>, Error> {
        self.submit(CommandType::FillImage, wait, |rt, q, wait| {
            rt.enqueue_fill_image(q, image.raw(), color, origin, region, wait)
        })
    }

    /// 等待列表为空时，在队列中此前的所有命令完成后完成。
    pub fn enqueue_marker(&self, wait: &[&Event]) -> Result<Event<'ctx>, Error> {
        self.submit(CommandType::Marker, wait, |rt, q, wait| {
            rt.enqueue_marker(q, wait)
        })
    }

    /// 同标记，另外阻挡队列中此后的命令。
    pub fn enqueue_barrier(&self, wait: &[&Event]) -> Result<Event<'ctx>, Error> {
        self.submit(CommandType::Barrier, wait, |rt, q, wait| {
            rt.enqueue_barrier(q, wait)
        })
    }

    pub fn flush(&self) -> Result<(), Error> {
        let result = self.ctx.runtime().flush(self.raw());
        self.last_error.record("flush", result)
    }

    /// 阻塞到队列中已提交的命令全部结束。
    pub fn finish(&self) -> Result<(), Error> {
        let result = self.ctx.runtime().finish(self.raw());
        self.last_error.record("finish", result)
    }
}

/// 从 `origin` 到 `extent` 边界的区域。
fn remaining(extent: [usize; 3], origin: [usize; 3]) -> [usize; 3] {
    [0, 1, 2].map(|d| extent[d].saturating_sub(origin[d]))
}

impl fmt::Debug for CommandQueue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "CommandQueue({:?}, {:?})", self.raw(), self.properties)
    }
}

#[cfg(test)]
mod test {
    use crate::{
        test_utils::{context, VECTOR_ADD},
        ChannelOrder, ChannelType, ErrorCode, ExecStatus, FillColor, ImageDesc, ImageFormat,
        MemFlags, MemObject, NdRange, QueueProperties,
    };
    use rand::Rng;

    #[test]
    fn test_copy_on_create() {
        let ctx = context();
        let queue = ctx
            .create_queue(&ctx.devices()[0], QueueProperties::empty())
            .unwrap();
        let data = [1.0f32, 2.0, 3.0, 4.0];
        let buf = ctx.create_buffer_from(&data, MemFlags::READ_ONLY).unwrap();
        assert_eq!(buf.len(), 4);
        assert_eq!(buf.size(), 16);

        let mut out = [0.0f32; 4];
        queue.read_buffer(&buf, 0, &mut out, &[]).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_round_trip() {
        let ctx = context();
        let queue = ctx
            .create_queue(&ctx.devices()[0], QueueProperties::empty())
            .unwrap();
        let mut rng = rand::thread_rng();
        let data = (0..1000).map(|_| rng.gen::<u32>()).collect::<Vec<_>>();
        let buf = ctx.create_buffer::<u32>(1000, MemFlags::READ_WRITE).unwrap();
        queue.write_buffer(&buf, 0, &data, &[]).unwrap();

        let mut out = vec![0u32; 1000];
        queue.read_buffer(&buf, 0, &mut out, &[]).unwrap();
        assert_eq!(out, data);

        let mut tail = vec![0u32; 10];
        queue.read_buffer(&buf, 990, &mut tail, &[]).unwrap();
        assert_eq!(tail, data[990..]);

        let e = queue.read_buffer(&buf, 995, &mut tail, &[]).unwrap_err();
        assert_eq!(e.code(), Some(ErrorCode::INVALID_VALUE));
        assert_eq!(queue.last_error(), ErrorCode::INVALID_VALUE);
    }

    #[test]
    fn test_fill_then_read() {
        let ctx = context();
        let queue = ctx
            .create_queue(&ctx.devices()[0], QueueProperties::empty())
            .unwrap();
        let buf = ctx.create_buffer_from(&[0u16; 12], MemFlags::READ_WRITE).unwrap();
        queue.fill_buffer(&buf, &[1u16, 2, 3], 3, 6, &[]).unwrap();

        let mut out = [0u16; 12];
        queue.read_buffer(&buf, 0, &mut out, &[]).unwrap();
        assert_eq!(out, [0, 0, 0, 1, 2, 3, 1, 2, 3, 0, 0, 0]);

        let e = queue.fill_buffer(&buf, &[1u16, 2, 3, 4], 0, 6, &[]).unwrap_err();
        assert_eq!(e.code(), Some(ErrorCode::INVALID_VALUE));
    }

    #[test]
    fn test_in_order() {
        let ctx = context();
        let queue = ctx
            .create_queue(&ctx.devices()[0], QueueProperties::PROFILING_ENABLE)
            .unwrap();
        let buf = ctx.create_buffer::<u8>(1 << 16, MemFlags::READ_WRITE).unwrap();
        let events = (0..3)
            .map(|i| queue.fill_buffer(&buf, &[i as u8], 0, 1 << 16, &[]).unwrap())
            .collect::<Vec<_>>();
        queue.finish().unwrap();

        let profiles = events
            .iter()
            .map(|e| e.profiling().unwrap())
            .collect::<Vec<_>>();
        assert!(profiles[0].end <= profiles[1].start);
        assert!(profiles[1].end <= profiles[2].start);

        let mut out = [0u8; 4];
        queue.read_buffer(&buf, 100, &mut out, &[]).unwrap();
        assert_eq!(out, [2; 4]);
    }

    #[test]
    fn test_marker() {
        let ctx = context();
        let queue = ctx
            .create_queue(&ctx.devices()[0], QueueProperties::OUT_OF_ORDER_EXEC_MODE_ENABLE)
            .unwrap();
        let buf = ctx.create_buffer::<u8>(256, MemFlags::READ_WRITE).unwrap();
        let gate = ctx.create_user_event().unwrap();
        let fills = (0..4)
            .map(|i| queue.fill_buffer(&buf, &[i as u8], i * 64, 64, &[&gate]).unwrap())
            .collect::<Vec<_>>();
        let marker = queue.enqueue_marker(&[]).unwrap();
        assert_eq!(marker.status().unwrap(), ExecStatus::Queued);

        gate.set_complete().unwrap();
        marker.wait().unwrap();
        for e in &fills {
            assert_eq!(e.status().unwrap(), ExecStatus::Complete)
        }
        let mut out = [0u8; 256];
        queue.read_buffer(&buf, 0, &mut out, &[]).unwrap();
        assert!(out.chunks(64).enumerate().all(|(i, c)| c.iter().all(|&x| x == i as u8)));
    }

    #[test]
    fn test_barrier() {
        let ctx = context();
        let queue = ctx
            .create_queue(&ctx.devices()[0], QueueProperties::OUT_OF_ORDER_EXEC_MODE_ENABLE)
            .unwrap();
        let buf = ctx.create_buffer::<u32>(16, MemFlags::READ_WRITE).unwrap();
        let gate = ctx.create_user_event().unwrap();
        let first = queue.fill_buffer(&buf, &[1u32], 0, 16, &[&gate]).unwrap();
        let barrier = queue.enqueue_barrier(&[]).unwrap();
        let second = queue.fill_buffer(&buf, &[2u32], 0, 16, &[]).unwrap();
        assert_eq!(second.status().unwrap(), ExecStatus::Queued);

        gate.set_complete().unwrap();
        second.wait().unwrap();
        assert_eq!(first.status().unwrap(), ExecStatus::Complete);
        assert_eq!(barrier.status().unwrap(), ExecStatus::Complete);

        let mut out = [0u32; 16];
        queue.read_buffer(&buf, 0, &mut out, &[]).unwrap();
        assert_eq!(out, [2; 16]);
    }

    #[test]
    fn test_copy_buffer() {
        let ctx = context();
        let queue = ctx
            .create_queue(&ctx.devices()[0], QueueProperties::empty())
            .unwrap();
        let src = ctx.create_buffer_from(&[1i64, 2, 3, 4], MemFlags::READ_ONLY).unwrap();
        let dst = ctx.create_buffer_from(&[0i64; 6], MemFlags::READ_WRITE).unwrap();
        queue.copy_buffer(&src, &dst, 0, 2, None, &[]).unwrap();
        queue.copy_buffer(&src, &dst, 3, 0, Some(1), &[]).unwrap();

        let mut out = [0i64; 6];
        queue.read_buffer(&dst, 0, &mut out, &[]).unwrap();
        assert_eq!(out, [4, 0, 1, 2, 3, 4]);

        let e = queue.copy_buffer(&dst, &dst, 0, 1, Some(2), &[]).unwrap_err();
        assert_eq!(e.code(), Some(ErrorCode::MEM_COPY_OVERLAP));
        let e = queue.copy_buffer(&src, &dst, 0, 4, None, &[]).unwrap_err();
        assert_eq!(e.code(), Some(ErrorCode::INVALID_VALUE));
    }

    #[test]
    fn test_non_blocking() {
        let ctx = context();
        let queue = ctx
            .create_queue(&ctx.devices()[0], QueueProperties::empty())
            .unwrap();
        let buf = ctx.create_buffer_from(&[5u32; 4], MemFlags::READ_WRITE).unwrap();
        let gate = ctx.create_user_event().unwrap();
        let src = [7u32; 4];
        let mut out = [0u32; 4];
        let write = unsafe { queue.enqueue_write_buffer(&buf, false, 0, &src, &[&gate]) }.unwrap();
        let read = unsafe { queue.enqueue_read_buffer(&buf, false, 0, &mut out, &[]) }.unwrap();
        assert_eq!(write.status().unwrap(), ExecStatus::Queued);
        assert_eq!(read.status().unwrap(), ExecStatus::Queued);
        queue.flush().unwrap();
        assert_eq!(read.status().unwrap(), ExecStatus::Queued);

        gate.set_complete().unwrap();
        read.wait().unwrap();
        assert_eq!(write.status().unwrap(), ExecStatus::Complete);
        assert_eq!(read.status().unwrap(), ExecStatus::Complete);
        assert_eq!(out, [7; 4]);
    }

    #[test]
    fn test_copy_defaults() {
        let ctx = context();
        let queue = ctx
            .create_queue(&ctx.devices()[0], QueueProperties::empty())
            .unwrap();
        let src = ctx.create_buffer_from(&[1u32, 2, 3, 4], MemFlags::READ_ONLY).unwrap();
        let dst = ctx.create_buffer_from(&[0u32; 4], MemFlags::READ_WRITE).unwrap();
        queue.copy_buffer(&src, &dst, 2, 0, None, &[]).unwrap();
        let mut out = [0u32; 4];
        queue.read_buffer(&dst, 0, &mut out, &[]).unwrap();
        assert_eq!(out, [3, 4, 0, 0]);

        let format = ImageFormat::new(ChannelOrder::R, ChannelType::Float);
        let pixels = (0..12).map(|i| i as f32).collect::<Vec<_>>();
        let image = ctx
            .create_image(format, &ImageDesc::image2d(4, 3), MemFlags::READ_ONLY, Some(&pixels))
            .unwrap();
        let target = ctx
            .create_image::<f32>(format, &ImageDesc::image2d(4, 3), MemFlags::READ_WRITE, None)
            .unwrap();
        queue
            .fill_image(&target, FillColor::Float([-1.; 4]), [0; 3], [4, 3, 1], &[])
            .unwrap();
        queue.copy_image(&image, &target, [2, 1, 0], [0; 3], None, &[]).unwrap();
        let mut grid = [0f32; 12];
        queue.read_image(&target, [0; 3], [4, 3, 1], &mut grid, &[]).unwrap();
        assert_eq!(
            grid,
            [6., 7., -1., -1., 10., 11., -1., -1., -1., -1., -1., -1.]
        );

        let flat = ctx.create_buffer::<f32>(12, MemFlags::READ_WRITE).unwrap();
        queue
            .copy_image_to_buffer(&image, &flat, [0, 1, 0], None, 0, &[])
            .unwrap();
        let mut rows = [0f32; 8];
        queue.read_buffer(&flat, 0, &mut rows, &[]).unwrap();
        assert_eq!(rows[..], pixels[4..]);

        queue
            .copy_buffer_to_image(&flat, &target, 0, [0, 2, 0], None, &[])
            .unwrap();
        let mut last = [0f32; 4];
        queue.read_image(&target, [0, 2, 0], [4, 1, 1], &mut last, &[]).unwrap();
        assert_eq!(last[..], pixels[4..8]);
    }

    #[test]
    fn test_oversized_ranges() {
        let ctx = context();
        let queue = ctx
            .create_queue(&ctx.devices()[0], QueueProperties::empty())
            .unwrap();
        let format = ImageFormat::new(ChannelOrder::RGBA, ChannelType::UnsignedInt8);
        let image = ctx
            .create_image::<u8>(format, &ImageDesc::image2d(2, 2), MemFlags::READ_WRITE, None)
            .unwrap();
        let mut out = [0u8; 16];
        let e = queue
            .read_image(&image, [0; 3], [usize::MAX / 2, 1, 1], &mut out, &[])
            .unwrap_err();
        assert_eq!(e.code(), Some(ErrorCode::INVALID_VALUE));
        assert_eq!(queue.last_error(), ErrorCode::INVALID_VALUE);
        let e = queue
            .write_image(&image, [0; 3], [2, usize::MAX / 4, 1], &out, &[])
            .unwrap_err();
        assert_eq!(e.code(), Some(ErrorCode::INVALID_VALUE));

        let buf = ctx.create_buffer::<u32>(4, MemFlags::READ_WRITE).unwrap();
        let mut item = [0u32; 1];
        let e = queue
            .read_buffer(&buf, usize::MAX / 2, &mut item, &[])
            .unwrap_err();
        assert_eq!(e.code(), Some(ErrorCode::INVALID_VALUE));
        let e = queue
            .fill_buffer(&buf, &[0u32], 0, usize::MAX, &[])
            .unwrap_err();
        assert_eq!(e.code(), Some(ErrorCode::INVALID_VALUE));
    }

    #[test]
    fn test_fill_image() {
        let ctx = context();
        let queue = ctx
            .create_queue(&ctx.devices()[0], QueueProperties::empty())
            .unwrap();
        let format = ImageFormat::new(ChannelOrder::RGBA, ChannelType::UnsignedInt8);
        let image = ctx
            .create_image::<u8>(format, &ImageDesc::image2d(2, 2), MemFlags::READ_WRITE, None)
            .unwrap();
        queue
            .fill_image(&image, FillColor::Uint([255, 0, 0, 255]), [0; 3], [2, 2, 1], &[])
            .unwrap();

        let mut out = [0u8; 16];
        queue.read_image(&image, [0; 3], [2, 2, 1], &mut out, &[]).unwrap();
        assert_eq!(out, [255u8, 0, 0, 255].repeat(4)[..]);

        let mut short = [0u8; 15];
        let e = queue
            .read_image(&image, [0; 3], [2, 2, 1], &mut short, &[])
            .unwrap_err();
        assert!(e.is_precondition());
    }

    #[test]
    fn test_image_copies() {
        let ctx = context();
        let queue = ctx
            .create_queue(&ctx.devices()[0], QueueProperties::empty())
            .unwrap();
        let format = ImageFormat::new(ChannelOrder::R, ChannelType::Float);
        let pixels = (0..12).map(|i| i as f32).collect::<Vec<_>>();
        let src = ctx
            .create_image(format, &ImageDesc::image2d(4, 3), MemFlags::READ_ONLY, Some(&pixels))
            .unwrap();
        let dst = ctx
            .create_image::<f32>(format, &ImageDesc::image2d(4, 3), MemFlags::READ_WRITE, None)
            .unwrap();
        queue
            .fill_image(&dst, FillColor::Float([-1.; 4]), [0; 3], [4, 3, 1], &[])
            .unwrap();
        queue
            .copy_image(&src, &dst, [1, 1, 0], [0, 0, 0], Some([2, 2, 1]), &[])
            .unwrap();

        let mut out = [0f32; 12];
        queue.read_image(&dst, [0; 3], [4, 3, 1], &mut out, &[]).unwrap();
        assert_eq!(
            out,
            [5., 6., -1., -1., 9., 10., -1., -1., -1., -1., -1., -1.]
        );

        let buf = ctx.create_buffer::<f32>(12, MemFlags::READ_WRITE).unwrap();
        queue.copy_image_to_buffer(&src, &buf, [0; 3], None, 0, &[]).unwrap();
        let mut flat = [0f32; 12];
        queue.read_buffer(&buf, 0, &mut flat, &[]).unwrap();
        assert_eq!(flat[..], pixels[..]);

        queue
            .copy_buffer_to_image(&buf, &dst, 4, [0; 3], Some([4, 2, 1]), &[])
            .unwrap();
        queue.read_image(&dst, [0; 3], [4, 3, 1], &mut out, &[]).unwrap();
        assert_eq!(out[..8], pixels[4..]);
    }

    #[test]
    fn test_image_array() {
        let ctx = context();
        let queue = ctx
            .create_queue(&ctx.devices()[0], QueueProperties::empty())
            .unwrap();
        let format = ImageFormat::new(ChannelOrder::R, ChannelType::UnsignedInt16);
        let layers = ctx
            .create_image::<u16>(format, &ImageDesc::image1d_array(4, 3), MemFlags::READ_WRITE, None)
            .unwrap();
        assert_eq!(layers.region(), [4, 3, 1]);
        let data = (0..12u16).collect::<Vec<_>>();
        queue.write_image(&layers, [0; 3], [4, 3, 1], &data, &[]).unwrap();

        let mut layer = [0u16; 4];
        queue.read_image(&layers, [0, 2, 0], [4, 1, 1], &mut layer, &[]).unwrap();
        assert_eq!(layer, [8, 9, 10, 11]);
    }

    #[test]
    fn test_kernel_dispatch() {
        let ctx = context();
        let queue = ctx
            .create_queue(&ctx.devices()[0], QueueProperties::empty())
            .unwrap();
        let n = 1000usize;
        let a = (0..n).map(|i| i as f32).collect::<Vec<_>>();
        let b = (0..n).map(|i| (2 * i) as f32).collect::<Vec<_>>();
        let a = ctx.create_buffer_from(&a, MemFlags::READ_ONLY).unwrap();
        let b = ctx.create_buffer_from(&b, MemFlags::READ_ONLY).unwrap();
        let c = ctx.create_buffer::<f32>(n, MemFlags::WRITE_ONLY).unwrap();

        let kernel = ctx.create_kernel(VECTOR_ADD, "vector_add", "").unwrap();
        kernel
            .set_mem_arg(0, &a)
            .unwrap()
            .set_mem_arg(1, &b)
            .unwrap()
            .set_mem_arg(2, &c)
            .unwrap();

        let e = queue
            .enqueue_kernel(&kernel, &NdRange::new(&[n]), &[])
            .unwrap_err();
        assert_eq!(e.code(), Some(ErrorCode::INVALID_KERNEL_ARGS));

        kernel.set_arg(3, &(n as u32)).unwrap();
        let done = queue
            .enqueue_kernel(&kernel, &NdRange::new(&[n]), &[])
            .unwrap();
        // 入队之后重新绑定不影响已经入队的命令
        kernel.set_arg(3, &0u32).unwrap();
        done.wait().unwrap();

        let mut out = vec![0f32; n];
        queue.read_buffer(&c, 0, &mut out, &[]).unwrap();
        assert!(out.iter().enumerate().all(|(i, &x)| x == (3 * i) as f32));

        let e = queue
            .enqueue_kernel(&kernel, &NdRange::new(&[n]).local(&[7]), &[])
            .unwrap_err();
        assert_eq!(e.code(), Some(ErrorCode::INVALID_WORK_GROUP_SIZE));
        let e = queue
            .enqueue_kernel(&kernel, &NdRange::new(&[1, 2, 3, 4]), &[])
            .unwrap_err();
        assert_eq!(e.code(), Some(ErrorCode::INVALID_WORK_DIMENSION));
    }

    #[test]
    fn test_released_queue() {
        let ctx = context();
        let queue = ctx
            .create_queue(&ctx.devices()[0], QueueProperties::empty())
            .unwrap();
        queue.release().unwrap();
        queue.release().unwrap();
        let e = queue.enqueue_marker(&[]).unwrap_err();
        assert_eq!(e.code(), Some(ErrorCode::INVALID_COMMAND_QUEUE));
        assert_eq!(
            queue.finish().unwrap_err().code(),
            Some(ErrorCode::INVALID_COMMAND_QUEUE)
        );
    }
}
