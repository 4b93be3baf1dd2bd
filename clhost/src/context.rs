use crate::{
    error::{
        functions::{no_device_found, precondition, status},
        LastError,
    },
    format::{host_pitches, host_size},
    handle::Owned,
    info::query_with,
    AddressingMode, Buffer, CommandQueue, Config, Device, DeviceType, Error, ErrorCode,
    FilterMode, Image, ImageDesc, ImageFormat, Kernel, MemFlags, MemObjectType, ObjectKind,
    Platform, Program, QueueProperties, RawHandle, Runtime, Sampler, UserEvent,
};
use bytemuck::Pod;
use log::debug;
use lru::LruCache;
use std::{
    ffi::c_void,
    fmt,
    mem::{size_of, size_of_val},
    num::NonZeroUsize,
    ptr::null_mut,
    sync::{Arc, Mutex},
};

/// 计算上下文。
///
/// 上下文内创建的对象都借用上下文，因此上下文总是最后释放。
pub struct Context {
    // 先于上下文句柄析构。
    programs: Option<Mutex<LruCache<ProgramKey, Owned>>>,
    handle: Owned,
    devices: Vec<Device>,
    last_error: LastError,
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
struct ProgramKey {
    source: String,
    options: String,
}

impl Context {
    /// 在给定设备上创建上下文，使用默认容量的程序缓存。
    #[inline]
    pub fn new(devices: &[Device]) -> Result<Self, Error> {
        Self::with_program_cache(devices, Config::default().program_cache)
    }

    /// 在给定设备上创建上下文，`program_cache` 为 0 时不缓存程序。
    pub fn with_program_cache(devices: &[Device], program_cache: usize) -> Result<Self, Error> {
        let Some(first) = devices.first() else {
            return Err(status(ErrorCode::INVALID_DEVICE, "empty device list"));
        };
        let runtime = first.runtime().clone();
        let raws = devices.iter().map(Device::raw).collect::<Vec<_>>();
        let raw = runtime
            .create_context(&raws)
            .map_err(|code| status(code, "create context"))?;
        debug!(
            "context {raw:?} on {} over {} device(s)",
            runtime.name(),
            devices.len()
        );
        Ok(Self {
            programs: NonZeroUsize::new(program_cache).map(|n| Mutex::new(LruCache::new(n))),
            handle: Owned::new(runtime, ObjectKind::Context, raw),
            devices: devices.to_vec(),
            last_error: LastError::default(),
        })
    }

    /// 按发现顺序找到第一个有满足条件设备的平台，用它的全部这类设备创建上下文。
    pub fn automatic(runtime: &Arc<dyn Runtime>, ty: DeviceType) -> Result<Self, Error> {
        for platform in Platform::all(runtime)? {
            let devices = platform.devices(ty)?;
            if !devices.is_empty() {
                return Self::new(&devices);
            }
        }
        Err(no_device_found(format!("{ty:?}")))
    }

    #[inline]
    pub fn raw(&self) -> RawHandle {
        self.handle.raw()
    }

    #[inline]
    pub fn runtime(&self) -> &Arc<dyn Runtime> {
        self.handle.runtime()
    }

    #[inline]
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    #[inline]
    pub fn last_error(&self) -> ErrorCode {
        self.last_error.get()
    }

    #[inline]
    pub(crate) fn record<T>(&self, what: &str, result: Result<T, ErrorCode>) -> Result<T, Error> {
        self.last_error.record(what, result)
    }

    /// 释放上下文和缓存的程序。之后在上下文上创建对象将失败，重复释放没有效果。
    pub fn release(&self) -> Result<(), Error> {
        if let Some(programs) = &self.programs {
            programs.lock().unwrap().clear()
        }
        let result = self.handle.release();
        self.record("release context", result)
    }

    pub fn supported_image_formats(
        &self,
        ty: MemObjectType,
        flags: MemFlags,
    ) -> Result<Vec<ImageFormat>, Error> {
        use crate::{ChannelOrder, ChannelType};
        let init = ImageFormat::new(ChannelOrder::RGBA, ChannelType::Float);
        let result = query_with(init, |out| {
            self.runtime()
                .supported_image_formats(self.raw(), flags, ty, out)
        });
        self.record("supported image formats", result)
    }

    pub fn create_queue(
        &self,
        device: &Device,
        properties: QueueProperties,
    ) -> Result<CommandQueue<'_>, Error> {
        let result = self
            .runtime()
            .create_command_queue(self.raw(), device.raw(), properties);
        let raw = self.record("create command queue", result)?;
        Ok(CommandQueue::new(self, raw, device.clone(), properties))
    }

    /// 创建能容纳 `len` 个 `T` 的缓冲，内容未初始化。
    pub fn create_buffer<T: Pod>(&self, len: usize, flags: MemFlags) -> Result<Buffer<'_, T>, Error> {
        unsafe { self.create_buffer_raw(len, flags, null_mut()) }
    }

    /// 创建缓冲并从 `data` 复制初始内容。
    pub fn create_buffer_from<T: Pod>(
        &self,
        data: &[T],
        flags: MemFlags,
    ) -> Result<Buffer<'_, T>, Error> {
        if flags.contains(MemFlags::USE_HOST_PTR) {
            return self.last_error.fail(precondition(
                "USE_HOST_PTR on borrowed data needs create_buffer_with_host_ptr",
            ));
        }
        let flags = flags | MemFlags::COPY_HOST_PTR;
        unsafe { self.create_buffer_raw(data.len(), flags, data.as_ptr() as *mut c_void) }
    }

    /// 创建直接使用宿主存储的缓冲。
    ///
    /// # Safety
    ///
    /// `ptr` 指向 `len` 个 `T`，在缓冲的整个生命期内有效，且命令执行期间不被宿主访问。
    pub unsafe fn create_buffer_with_host_ptr<T: Pod>(
        &self,
        ptr: *mut T,
        len: usize,
        flags: MemFlags,
    ) -> Result<Buffer<'_, T>, Error> {
        self.create_buffer_raw(len, flags | MemFlags::USE_HOST_PTR, ptr.cast())
    }

    unsafe fn create_buffer_raw<T: Pod>(
        &self,
        len: usize,
        flags: MemFlags,
        host: *mut c_void,
    ) -> Result<Buffer<'_, T>, Error> {
        let Some(size) = len.checked_mul(size_of::<T>()) else {
            return self.last_error.fail(status(
                ErrorCode::INVALID_BUFFER_SIZE,
                format!("{len} items of {} bytes", size_of::<T>()),
            ));
        };
        let result = self.runtime().create_buffer(self.raw(), flags, size, host);
        let raw = self.record("create buffer", result)?;
        Ok(Buffer::new(self, raw, flags, len))
    }

    /// 创建图像，`host` 非空时复制初始内容。
    ///
    /// 初始内容按 `desc` 中的行距和层距排列。
    pub fn create_image<T: Pod>(
        &self,
        format: ImageFormat,
        desc: &ImageDesc,
        flags: MemFlags,
        host: Option<&[T]>,
    ) -> Result<Image<'_>, Error> {
        if !desc.is_consistent() {
            return self.last_error.fail(status(
                ErrorCode::INVALID_IMAGE_DESCRIPTOR,
                format!("{desc:?}"),
            ));
        }
        if !self
            .supported_image_formats(desc.ty, flags)?
            .contains(&format)
        {
            return self.last_error.fail(status(
                ErrorCode::IMAGE_FORMAT_NOT_SUPPORTED,
                format!("{format:?} for {:?}", desc.ty),
            ));
        }
        if flags.contains(MemFlags::USE_HOST_PTR) {
            return self
                .last_error
                .fail(precondition("USE_HOST_PTR is not supported for images"));
        }

        let (flags, ptr) = match host {
            Some(data) => {
                let region = desc.region();
                let pixel = format.pixel_size();
                let Some(need) =
                    host_pitches(desc.ty, region, pixel, desc.row_pitch, desc.slice_pitch)
                        .and_then(|pitches| host_size(region, pixel, pitches))
                else {
                    return self.last_error.fail(status(
                        ErrorCode::INVALID_IMAGE_SIZE,
                        format!("{desc:?} overflows host memory"),
                    ));
                };
                if size_of_val(data) < need {
                    return self.last_error.fail(precondition(format!(
                        "image needs {need} bytes of host data, {} given",
                        size_of_val(data)
                    )));
                }
                (flags | MemFlags::COPY_HOST_PTR, data.as_ptr() as *mut c_void)
            }
            None => (flags, null_mut()),
        };
        let result = unsafe { self.runtime().create_image(self.raw(), flags, format, desc, ptr) };
        let raw = self.record("create image", result)?;
        Ok(Image::new(self, raw, flags, format, *desc))
    }

    pub fn create_sampler(
        &self,
        normalized_coords: bool,
        addressing: AddressingMode,
        filter: FilterMode,
    ) -> Result<Sampler<'_>, Error> {
        let result = self
            .runtime()
            .create_sampler(self.raw(), normalized_coords, addressing, filter);
        let raw = self.record("create sampler", result)?;
        Ok(Sampler::new(self, raw, normalized_coords, addressing, filter))
    }

    pub fn create_user_event(&self) -> Result<UserEvent<'_>, Error> {
        let result = self.runtime().create_user_event(self.raw());
        let raw = self.record("create user event", result)?;
        Ok(UserEvent::new(self, raw))
    }

    /// 为上下文的所有设备编译程序，失败时错误信息是编译日志。
    pub fn build_program(&self, source: &str, options: &str) -> Result<Program<'_>, Error> {
        let result = self.runtime().create_program_with_source(self.raw(), source);
        let raw = self.record("create program", result)?;
        let program = Program::new(self, raw);
        match program.build(options) {
            Ok(()) => Ok(program),
            Err(e) => self.last_error.fail(e),
        }
    }

    /// 从源码取得核函数，编译结果按源码和选项缓存在上下文中。
    pub fn create_kernel(&self, source: &str, name: &str, options: &str) -> Result<Kernel<'_>, Error> {
        let Some(programs) = &self.programs else {
            return self.build_program(source, options)?.kernel(name);
        };
        let key = ProgramKey {
            source: source.into(),
            options: options.into(),
        };
        let mut programs = programs.lock().unwrap();
        let program = match programs.get(&key) {
            Some(program) => program.raw(),
            None => {
                let handle = self.build_program(source, options)?.into_owned();
                let raw = handle.raw();
                if let Some((_, evicted)) = programs.push(key, handle) {
                    debug!("program {:?} evicted from cache", evicted.raw())
                }
                raw
            }
        };
        Kernel::create(self, program, name)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Context({:?}, {:?})", self.raw(), self.devices)
    }
}

#[cfg(test)]
mod test {
    use crate::{
        test_utils::{context, runtime, VECTOR_ADD},
        ChannelOrder, ChannelType, Context, DeviceType, ErrorCode, ErrorKind, ImageDesc,
        ImageFormat, MemFlags, MemObject, MemObjectType, QueueProperties,
    };

    #[test]
    fn test_empty_devices() {
        let e = Context::new(&[]).unwrap_err();
        assert_eq!(e.code(), Some(ErrorCode::INVALID_DEVICE));
    }

    #[test]
    fn test_automatic() {
        let runtime = runtime();
        let ctx = Context::automatic(&runtime, DeviceType::GPU).unwrap();
        assert_eq!(ctx.devices().len(), 1);
        assert_eq!(ctx.devices()[0].ty(), DeviceType::GPU);

        let e = Context::automatic(&runtime, DeviceType::ACCELERATOR).unwrap_err();
        assert_eq!(e.kind, ErrorKind::NoDeviceFound);
    }

    #[test]
    fn test_release_then_create() {
        let ctx = context();
        ctx.release().unwrap();
        let e = ctx.create_buffer::<f32>(4, MemFlags::READ_WRITE).unwrap_err();
        assert_eq!(e.code(), Some(ErrorCode::INVALID_CONTEXT));
        assert_eq!(ctx.last_error(), ErrorCode::INVALID_CONTEXT);
        assert!(ctx.create_user_event().is_err());
        assert!(ctx
            .create_queue(&ctx.devices()[0], QueueProperties::empty())
            .is_err());
        // 重复释放
        ctx.release().unwrap();
        assert_eq!(ctx.last_error(), ErrorCode::SUCCESS);
    }

    #[test]
    fn test_buffer_preconditions() {
        let ctx = context();
        let e = ctx
            .create_buffer_from(&[1u8, 2, 3], MemFlags::USE_HOST_PTR)
            .unwrap_err();
        assert!(e.is_precondition());
        let e = ctx
            .create_buffer::<u8>(4, MemFlags::COPY_HOST_PTR)
            .unwrap_err();
        assert_eq!(e.code(), Some(ErrorCode::INVALID_HOST_PTR));
        let e = unsafe {
            ctx.create_buffer_with_host_ptr::<u8>(std::ptr::null_mut(), 4, MemFlags::READ_WRITE)
        }
        .unwrap_err();
        assert_eq!(e.code(), Some(ErrorCode::INVALID_HOST_PTR));
        let e = ctx
            .create_buffer_from::<f32>(&[], MemFlags::READ_ONLY)
            .unwrap_err();
        assert_eq!(e.code(), Some(ErrorCode::INVALID_BUFFER_SIZE));
    }

    #[test]
    fn test_buffer_size() {
        let ctx = context();
        let buf = ctx.create_buffer::<[f32; 3]>(5, MemFlags::READ_WRITE).unwrap();
        assert_eq!(buf.len(), 5);
        assert_eq!(buf.item_size(), 12);
        assert_eq!(buf.size(), buf.len() * buf.item_size());
        assert_eq!(buf.object_type(), MemObjectType::Buffer);
    }

    #[test]
    fn test_buffer_size_overflow() {
        let ctx = context();
        let e = ctx
            .create_buffer::<u64>(usize::MAX / 4, MemFlags::READ_WRITE)
            .unwrap_err();
        assert_eq!(e.code(), Some(ErrorCode::INVALID_BUFFER_SIZE));
        assert_eq!(ctx.last_error(), ErrorCode::INVALID_BUFFER_SIZE);

        let rgba8 = ImageFormat::new(ChannelOrder::RGBA, ChannelType::UnsignedInt8);
        let e = ctx
            .create_image(
                rgba8,
                &ImageDesc::image2d(usize::MAX / 2, 1),
                MemFlags::READ_WRITE,
                Some(&[0u8; 16]),
            )
            .unwrap_err();
        assert_eq!(e.code(), Some(ErrorCode::INVALID_IMAGE_SIZE));
    }

    #[test]
    fn test_image_checks() {
        let ctx = context();
        let rgba8 = ImageFormat::new(ChannelOrder::RGBA, ChannelType::UnsignedInt8);
        let formats = ctx
            .supported_image_formats(MemObjectType::Image2D, MemFlags::READ_WRITE)
            .unwrap();
        assert!(formats.contains(&rgba8));

        let unsupported = ImageFormat::new(ChannelOrder::BGRA, ChannelType::Float);
        let e = ctx
            .create_image::<u8>(unsupported, &ImageDesc::image2d(2, 2), MemFlags::READ_WRITE, None)
            .unwrap_err();
        assert_eq!(e.code(), Some(ErrorCode::IMAGE_FORMAT_NOT_SUPPORTED));

        let e = ctx
            .create_image(rgba8, &ImageDesc::image2d(2, 2), MemFlags::READ_WRITE, Some(&[0u8; 15]))
            .unwrap_err();
        assert!(e.is_precondition());

        let e = ctx
            .create_image::<u8>(rgba8, &ImageDesc::image2d_array(2, 2, 0), MemFlags::READ_WRITE, None)
            .unwrap_err();
        assert_eq!(e.code(), Some(ErrorCode::INVALID_IMAGE_DESCRIPTOR));

        let image = ctx
            .create_image(rgba8, &ImageDesc::image2d(2, 2), MemFlags::READ_WRITE, Some(&[7u8; 16]))
            .unwrap();
        assert_eq!(image.size(), 16);
    }

    #[test]
    fn test_program_cache() {
        let ctx = context();
        let a = ctx.create_kernel(VECTOR_ADD, "vector_add", "").unwrap();
        let b = ctx.create_kernel(VECTOR_ADD, "vector_add", "").unwrap();
        assert_ne!(a.raw(), b.raw());
        assert_eq!(a.num_args(), 4);
        assert_eq!(ctx.programs.as_ref().unwrap().lock().unwrap().len(), 1);

        let e = ctx.create_kernel(VECTOR_ADD, "missing", "").unwrap_err();
        assert_eq!(e.code(), Some(ErrorCode::INVALID_KERNEL_NAME));
    }
}
