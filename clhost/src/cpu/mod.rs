//! 进程内的模拟设备。
//!
//! 按原生约定实现 [`Runtime`]：对象存放在句柄表中，命令在线程池上按依赖关系执行，
//! 核函数由宿主注册的实现执行。

mod blob;
mod compiler;
mod event;
mod exec;
mod image;
mod object;
mod pool;

pub use exec::{ImageView, KernelArgs, KernelFn, MemView, SamplerDesc, WorkGroup, WorkItem};

use crate::{
    config::CpuConfig,
    error::functions::status,
    format::host_pitches,
    info::{answer, answer_with},
    AddressingMode, DeviceParam, DeviceType, Error, ErrorCode, EventCallback, ExecStatus,
    FillColor, FilterMode, ImageDesc, ImageFormat, KernelParam, MemFlags, MemObjectType, NdRange,
    ObjectKind, PlatformParam, ProfilingParam, QueueProperties, RawHandle, Runtime,
};
use blob::{Blob, Storage};
use bytemuck::Pod;
use compiler::{Diagnostic, ParamKind, Signature};
use event::{Callbacks, EventState, Job, Pending};
use exec::Geometry;
use image::{copy_region, encode, fill_region, supported_formats, Layout};
use log::{debug, info, trace};
use object::{
    ArgValue, ContextState, DeviceState, ImageInfo, KernelDef, KernelState, MemState, Object,
    PlatformState, ProgramState, QueueState, SamplerState, Table,
};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::{
    collections::HashMap,
    ffi::c_void,
    mem::size_of,
    ptr::{copy, copy_nonoverlapping, NonNull},
    slice::from_raw_parts,
    sync::{
        atomic::{AtomicUsize, Ordering::Relaxed},
        Arc, RwLock,
    },
    time::Instant,
};

/// 模拟设备的图像尺寸上限。
const IMAGE2D_MAX: [usize; 2] = [8192, 8192];
const IMAGE3D_MAX: [usize; 3] = [2048, 2048, 2048];
const IMAGE_MAX_ARRAY_SIZE: usize = 2048;

pub struct CpuRuntime {
    table: Table,
    kernels: RwLock<HashMap<String, Arc<KernelFn>>>,
    pool: Arc<ThreadPool>,
    callbacks: Arc<Callbacks>,
    epoch: Instant,
    commands_submitted: AtomicUsize,
    user_event_updates: AtomicUsize,
}

/// 运行时计数器。
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct Stats {
    pub commands_submitted: usize,
    pub user_event_updates: usize,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Command {
    Normal,
    Marker,
    Barrier,
}

/// 跨线程传递的宿主指针，有效性由入队调用的调用者保证。
#[derive(Clone, Copy)]
struct HostPtr(*mut u8);

unsafe impl Send for HostPtr {}

impl HostPtr {
    #[inline]
    fn get(self) -> *mut u8 {
        self.0
    }
}

impl CpuRuntime {
    pub const NAME: &'static str = "clhost-cpu";

    pub fn new(config: &CpuConfig) -> Result<Self, Error> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(|i| format!("clhost-worker-{i}"))
            .build()
            .map_err(|e| status(ErrorCode::OUT_OF_RESOURCES, e.to_string()))?;
        let callbacks =
            Callbacks::new().map_err(|e| status(ErrorCode::OUT_OF_RESOURCES, e.to_string()))?;

        let table = Table::new();
        for platform in &config.platforms {
            let handle = table.alloc();
            let devices = platform
                .devices
                .iter()
                .map(|device| {
                    table.add(Object::Device(Arc::new(DeviceState {
                        platform: handle,
                        config: device.clone(),
                    })))
                })
                .collect();
            table.insert(
                handle,
                Object::Platform(Arc::new(PlatformState {
                    name: platform.name.clone(),
                    vendor: platform.vendor.clone(),
                    version: platform.version.clone(),
                    devices,
                })),
            )
        }
        info!(
            "simulated runtime with {} platform(s) on {} worker(s)",
            config.platforms.len(),
            pool.current_num_threads()
        );
        Ok(Self {
            table,
            kernels: Default::default(),
            pool: Arc::new(pool),
            callbacks: Arc::new(callbacks),
            epoch: Instant::now(),
            commands_submitted: AtomicUsize::new(0),
            user_event_updates: AtomicUsize::new(0),
        })
    }

    /// 为名为 `name` 的核函数注册宿主实现，同名的实现被替换。
    ///
    /// 编译时源码中的核函数按名字与注册的实现配对，没有实现的核函数导致编译失败。
    ///
    /// # Safety
    ///
    /// 工作组并行执行，实现不得让不同工作组同时写同一位置。
    pub unsafe fn register_kernel(
        &self,
        name: impl Into<String>,
        body: impl Fn(&WorkGroup, &KernelArgs) + Send + Sync + 'static,
    ) {
        let name = name.into();
        debug!("register kernel `{name}`");
        self.kernels.write().unwrap().insert(name, Arc::new(body));
    }

    pub fn stats(&self) -> Stats {
        Stats {
            commands_submitted: self.commands_submitted.load(Relaxed),
            user_event_updates: self.user_event_updates.load(Relaxed),
        }
    }

    fn devices_of(&self, ctx: &ContextState) -> Result<Vec<Arc<DeviceState>>, ErrorCode> {
        ctx.devices.iter().map(|&d| self.table.device(d)).collect()
    }

    /// 上下文中所有设备都能分配的最大单个存储对象。
    fn max_alloc(&self, ctx: &ContextState) -> Result<u64, ErrorCode> {
        Ok(self
            .devices_of(ctx)?
            .iter()
            .map(|d| max_mem_alloc(d.config.global_mem_size))
            .min()
            .unwrap_or(0))
    }

    fn link(&self, signatures: Vec<Signature>) -> Result<Vec<Arc<KernelDef>>, Vec<Diagnostic>> {
        let registry = self.kernels.read().unwrap();
        let mut errors = vec![];
        let mut ans = vec![];
        for Signature { name, params, line } in signatures {
            match registry.get(&name) {
                Some(body) => ans.push(Arc::new(KernelDef {
                    name,
                    params,
                    body: body.clone(),
                })),
                None => errors.push(Diagnostic {
                    line,
                    message: format!("kernel `{name}` has no registered implementation"),
                }),
            }
        }
        if errors.is_empty() {
            Ok(ans)
        } else {
            Err(errors)
        }
    }

    fn launcher(&self) -> Box<dyn Fn(Arc<Pending>) + Send + Sync> {
        let pool = self.pool.clone();
        let callbacks = self.callbacks.clone();
        Box::new(move |pending| {
            let callbacks = callbacks.clone();
            pool.spawn(move || pending.run(&callbacks))
        })
    }

    fn wait_list(
        &self,
        context: RawHandle,
        wait: &[RawHandle],
    ) -> Result<Vec<Arc<EventState>>, ErrorCode> {
        wait.iter()
            .map(|&h| {
                let event = self
                    .table
                    .event(h)
                    .map_err(|_| ErrorCode::INVALID_EVENT_WAIT_LIST)?;
                if event.context == context {
                    Ok(event)
                } else {
                    Err(ErrorCode::INVALID_CONTEXT)
                }
            })
            .collect()
    }

    /// 把命令放入队列。
    ///
    /// 命令依赖等待列表中的事件，另外按队列模式依赖此前的命令或屏障，
    /// 等待列表为空的标记和屏障依赖所有未结束的命令。只约束顺序的依赖失败不影响命令。
    fn enqueue(
        &self,
        queue: &QueueState,
        queue_handle: RawHandle,
        wait: &[RawHandle],
        command: Command,
        job: Job,
    ) -> Result<Arc<EventState>, ErrorCode> {
        let waits = self.wait_list(queue.context, wait)?;
        let handle = self.table.alloc();
        let event = Arc::new(EventState::new(
            handle,
            queue.context,
            Some(queue_handle),
            queue.properties.contains(QueueProperties::PROFILING_ENABLE),
            self.epoch,
        ));

        let pending = {
            let mut order = queue.order.lock().unwrap();
            order.prune();
            let mut after = if queue
                .properties
                .contains(QueueProperties::OUT_OF_ORDER_EXEC_MODE_ENABLE)
            {
                order.barrier.iter().cloned().collect::<Vec<_>>()
            } else {
                order.last.iter().cloned().collect::<Vec<_>>()
            };
            if command != Command::Normal && wait.is_empty() {
                after.extend(order.outstanding.iter().cloned())
            }

            let pending = Pending::new(waits.len() + after.len(), event.clone(), job, self.launcher());
            for e in &waits {
                e.add_dependent(&pending, true, &self.callbacks)
            }
            for e in &after {
                e.add_dependent(&pending, false, &self.callbacks)
            }

            order.last = Some(event.clone());
            if command == Command::Barrier {
                order.barrier = Some(event.clone())
            }
            order.outstanding.push(event.clone());
            pending
        };

        trace!(
            "queue {queue_handle:?}: {command:?} command -> event {handle:?} after {} event(s)",
            waits.len()
        );
        self.table.insert(handle, Object::Event(event.clone()));
        self.commands_submitted.fetch_add(1, Relaxed);
        pending.resolve(false, &self.callbacks);
        Ok(event)
    }

    /// 阻塞调用等待命令结束，失败时丢弃事件并返回命令的错误码。
    fn finish_command(&self, event: Arc<EventState>, blocking: bool) -> Result<RawHandle, ErrorCode> {
        if blocking {
            let status = event.wait();
            if status < 0 {
                let _ = self.table.remove(ObjectKind::Event, event.handle);
                return Err(ErrorCode(status));
            }
        }
        Ok(event.handle)
    }

    fn mem_in(&self, queue: &QueueState, handle: RawHandle) -> Result<Arc<MemState>, ErrorCode> {
        let mem = self.table.mem(handle)?;
        if mem.context == queue.context {
            Ok(mem)
        } else {
            Err(ErrorCode::INVALID_CONTEXT)
        }
    }

    fn buffer_in(&self, queue: &QueueState, handle: RawHandle) -> Result<Arc<MemState>, ErrorCode> {
        let mem = self.mem_in(queue, handle)?;
        if mem.ty == MemObjectType::Buffer {
            Ok(mem)
        } else {
            Err(ErrorCode::INVALID_MEM_OBJECT)
        }
    }

    fn image_in(
        &self,
        queue: &QueueState,
        handle: RawHandle,
    ) -> Result<(Arc<MemState>, ImageInfo), ErrorCode> {
        let mem = self.mem_in(queue, handle)?;
        match mem.image {
            Some(info) => Ok((mem, info)),
            None => Err(ErrorCode::INVALID_MEM_OBJECT),
        }
    }

    #[allow(clippy::too_many_arguments)]
    unsafe fn transfer_image(
        &self,
        queue: RawHandle,
        image: RawHandle,
        blocking: bool,
        origin: [usize; 3],
        region: [usize; 3],
        row_pitch: usize,
        slice_pitch: usize,
        host: *mut u8,
        wait: &[RawHandle],
        read: bool,
    ) -> Result<RawHandle, ErrorCode> {
        let q = self.table.queue(queue)?;
        let (img, info) = self.image_in(&q, image)?;
        let allowed = if read {
            img.host_readable()
        } else {
            img.host_writable()
        };
        if !allowed {
            return Err(ErrorCode::INVALID_OPERATION);
        }
        check_region(&info, origin, region)?;
        if host.is_null() {
            return Err(ErrorCode::INVALID_VALUE);
        }
        let pixel = info.format.pixel_size();
        let row = region[0] * pixel;
        if (row_pitch != 0 && row_pitch < row) || (slice_pitch != 0 && slice_pitch < row_pitch.max(row)) {
            return Err(ErrorCode::INVALID_VALUE);
        }
        let pitches = host_pitches(info.desc.ty, region, pixel, row_pitch, slice_pitch)
            .ok_or(ErrorCode::INVALID_VALUE)?;
        let host = HostPtr(host);
        let job: Job = Box::new(move || {
            let device = Layout {
                ptr: img.storage.ptr(),
                pitches: info.pitches(),
            }
            .at([origin[0] * pixel, origin[1], origin[2]]);
            let host = Layout {
                ptr: host.get(),
                pitches,
            };
            let (src, dst) = if read { (device, host) } else { (host, device) };
            unsafe { copy_region(src, dst, row, region[1], region[2]) };
            Ok(())
        });
        let event = self.enqueue(&q, queue, wait, Command::Normal, job)?;
        self.finish_command(event, blocking)
    }
}

impl Runtime for CpuRuntime {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn platform_ids(&self, out: Option<&mut [RawHandle]>) -> Result<usize, ErrorCode> {
        answer_with(&self.table.platforms(), out)
    }

    fn platform_info(
        &self,
        platform: RawHandle,
        param: PlatformParam,
        out: Option<&mut [u8]>,
    ) -> Result<usize, ErrorCode> {
        let p = self.table.platform(platform)?;
        let val = match param {
            PlatformParam::Profile => "FULL_PROFILE",
            PlatformParam::Version => &p.version,
            PlatformParam::Name => &p.name,
            PlatformParam::Vendor => &p.vendor,
            PlatformParam::Extensions => "cl_khr_icd",
        };
        answer(&c_string(val), out)
    }

    fn device_ids(
        &self,
        platform: RawHandle,
        ty: DeviceType,
        out: Option<&mut [RawHandle]>,
    ) -> Result<usize, ErrorCode> {
        let p = self.table.platform(platform)?;
        if ty.is_empty() {
            return Err(ErrorCode::INVALID_DEVICE_TYPE);
        }
        let mut ans = vec![];
        for (i, &d) in p.devices.iter().enumerate() {
            let device = self.table.device(d)?;
            if ty.contains(DeviceType::ALL)
                || (ty.contains(DeviceType::DEFAULT) && i == 0)
                || ty.intersects(device.config.ty)
            {
                ans.push(d)
            }
        }
        if ans.is_empty() {
            return Err(ErrorCode::DEVICE_NOT_FOUND);
        }
        answer_with(&ans, out)
    }

    fn device_info(
        &self,
        device: RawHandle,
        param: DeviceParam,
        out: Option<&mut [u8]>,
    ) -> Result<usize, ErrorCode> {
        let d = self.table.device(device)?;
        let p = self.table.platform(d.platform)?;
        let c = &d.config;
        let images = c.image_support;
        let image_limit = |limit: usize| if images { limit } else { 0 };
        use DeviceParam as P;
        let val = match param {
            P::Type => bytes(c.ty.bits()),
            P::MaxComputeUnits => bytes(c.compute_units),
            P::MaxWorkItemDimensions => bytes(3u32),
            P::MaxWorkGroupSize => bytes(c.max_work_group_size),
            P::MaxWorkItemSizes => bytemuck::cast_slice(&[c.max_work_group_size; 3]).to_vec(),
            P::PreferredVectorWidthChar => bytes(16u32),
            P::PreferredVectorWidthShort => bytes(8u32),
            P::PreferredVectorWidthInt => bytes(4u32),
            P::PreferredVectorWidthLong => bytes(2u32),
            P::PreferredVectorWidthFloat => bytes(4u32),
            P::PreferredVectorWidthDouble => bytes(2u32),
            P::PreferredVectorWidthHalf => bytes(8u32),
            P::MaxClockFrequency => bytes(c.clock_mhz),
            P::AddressBits => bytes(usize::BITS),
            P::MaxMemAllocSize => bytes(max_mem_alloc(c.global_mem_size)),
            P::Image2dMaxWidth => bytes(image_limit(IMAGE2D_MAX[0])),
            P::Image2dMaxHeight => bytes(image_limit(IMAGE2D_MAX[1])),
            P::Image3dMaxWidth => bytes(image_limit(IMAGE3D_MAX[0])),
            P::Image3dMaxHeight => bytes(image_limit(IMAGE3D_MAX[1])),
            P::Image3dMaxDepth => bytes(image_limit(IMAGE3D_MAX[2])),
            P::ImageMaxArraySize => bytes(image_limit(IMAGE_MAX_ARRAY_SIZE)),
            P::ImageSupport => bytes(images as u32),
            P::GlobalMemCacheSize => bytes(c.local_mem_size * 32),
            P::GlobalMemSize => bytes(c.global_mem_size),
            P::MaxConstantBufferSize => bytes(64u64 << 10),
            P::LocalMemSize => bytes(c.local_mem_size),
            P::Available => bytes(c.available as u32),
            P::Name => c_string(&c.name),
            P::Vendor => c_string(&p.vendor),
            P::DriverVersion => c_string(env!("CARGO_PKG_VERSION")),
            P::Profile => c_string("FULL_PROFILE"),
            P::Version => c_string(&p.version),
            P::Extensions => c_string("cl_khr_fp16 cl_khr_fp64 cl_khr_byte_addressable_store"),
            P::Platform => bytes(d.platform.0),
        };
        answer(&val, out)
    }

    fn create_context(&self, devices: &[RawHandle]) -> Result<RawHandle, ErrorCode> {
        if devices.is_empty() {
            return Err(ErrorCode::INVALID_VALUE);
        }
        for &d in devices {
            if !self.table.device(d)?.config.available {
                return Err(ErrorCode::DEVICE_NOT_AVAILABLE);
            }
        }
        let handle = self.table.add(Object::Context(Arc::new(ContextState {
            devices: devices.to_vec(),
        })));
        debug!("context {handle:?} over {devices:?}");
        Ok(handle)
    }

    fn supported_image_formats(
        &self,
        context: RawHandle,
        flags: MemFlags,
        ty: MemObjectType,
        out: Option<&mut [ImageFormat]>,
    ) -> Result<usize, ErrorCode> {
        self.table.context(context)?;
        check_flags(flags)?;
        answer_with(&supported_formats(ty), out)
    }

    fn create_command_queue(
        &self,
        context: RawHandle,
        device: RawHandle,
        properties: QueueProperties,
    ) -> Result<RawHandle, ErrorCode> {
        let ctx = self.table.context(context)?;
        self.table.device(device)?;
        if !ctx.devices.contains(&device) {
            return Err(ErrorCode::INVALID_DEVICE);
        }
        if !QueueProperties::all().contains(properties) {
            return Err(ErrorCode::INVALID_VALUE);
        }
        Ok(self.table.add(Object::Queue(Arc::new(QueueState {
            context,
            device,
            properties,
            order: Default::default(),
        }))))
    }

    unsafe fn create_buffer(
        &self,
        context: RawHandle,
        flags: MemFlags,
        size: usize,
        host: *mut c_void,
    ) -> Result<RawHandle, ErrorCode> {
        let ctx = self.table.context(context)?;
        check_flags(flags)?;
        if size == 0 || size as u64 > self.max_alloc(&ctx)? {
            return Err(ErrorCode::INVALID_BUFFER_SIZE);
        }
        let storage = match (NonNull::new(host.cast::<u8>()), flags.needs_host_ptr()) {
            (None, false) => Storage::Owned(Blob::new(size)),
            (Some(ptr), true) if flags.contains(MemFlags::USE_HOST_PTR) => Storage::Host(ptr),
            (Some(ptr), true) => {
                let blob = Blob::new(size);
                copy_nonoverlapping(ptr.as_ptr(), blob.as_ptr(), size);
                Storage::Owned(blob)
            }
            _ => return Err(ErrorCode::INVALID_HOST_PTR),
        };
        Ok(self.table.add(Object::Mem(Arc::new(MemState {
            context,
            flags,
            ty: MemObjectType::Buffer,
            size,
            image: None,
            storage: Arc::new(storage),
        }))))
    }

    unsafe fn create_image(
        &self,
        context: RawHandle,
        flags: MemFlags,
        format: ImageFormat,
        desc: &ImageDesc,
        host: *mut c_void,
    ) -> Result<RawHandle, ErrorCode> {
        let ctx = self.table.context(context)?;
        check_flags(flags)?;
        if !desc.is_consistent() {
            return Err(ErrorCode::INVALID_IMAGE_DESCRIPTOR);
        }
        if !self.devices_of(&ctx)?.iter().any(|d| d.config.image_support) {
            return Err(ErrorCode::INVALID_OPERATION);
        }
        if !supported_formats(desc.ty).contains(&format) {
            return Err(ErrorCode::IMAGE_FORMAT_NOT_SUPPORTED);
        }
        check_image_size(desc)?;
        if flags.contains(MemFlags::USE_HOST_PTR) {
            return Err(ErrorCode::INVALID_VALUE);
        }

        let host = NonNull::new(host.cast::<u8>());
        if host.is_some() != flags.contains(MemFlags::COPY_HOST_PTR) {
            return Err(ErrorCode::INVALID_HOST_PTR);
        }
        let info = ImageInfo {
            format,
            desc: *desc,
        };
        let pixel = format.pixel_size();
        let region = desc.region();
        let row = region[0] * pixel;
        if host.is_none() && (desc.row_pitch != 0 || desc.slice_pitch != 0) {
            return Err(ErrorCode::INVALID_IMAGE_DESCRIPTOR);
        }
        if (desc.row_pitch != 0 && desc.row_pitch < row)
            || (desc.slice_pitch != 0 && desc.slice_pitch < desc.row_pitch.max(row))
        {
            return Err(ErrorCode::INVALID_IMAGE_DESCRIPTOR);
        }
        let size = region.iter().product::<usize>() * pixel;

        let storage = if desc.ty == MemObjectType::Image1DBuffer {
            if host.is_some() {
                return Err(ErrorCode::INVALID_HOST_PTR);
            }
            let buffer = self
                .table
                .mem(desc.buffer)
                .map_err(|_| ErrorCode::INVALID_IMAGE_DESCRIPTOR)?;
            if buffer.ty != MemObjectType::Buffer || buffer.context != context {
                return Err(ErrorCode::INVALID_IMAGE_DESCRIPTOR);
            }
            if size > buffer.size {
                return Err(ErrorCode::INVALID_IMAGE_SIZE);
            }
            buffer.storage.clone()
        } else {
            let blob = Blob::new(size);
            if let Some(ptr) = host {
                let pitches = host_pitches(desc.ty, region, pixel, desc.row_pitch, desc.slice_pitch)
                    .ok_or(ErrorCode::INVALID_IMAGE_DESCRIPTOR)?;
                copy_region(
                    Layout {
                        ptr: ptr.as_ptr(),
                        pitches,
                    },
                    Layout {
                        ptr: blob.as_ptr(),
                        pitches: info.pitches(),
                    },
                    row,
                    region[1],
                    region[2],
                )
            }
            Arc::new(Storage::Owned(blob))
        };
        Ok(self.table.add(Object::Mem(Arc::new(MemState {
            context,
            flags,
            ty: desc.ty,
            size,
            image: Some(info),
            storage,
        }))))
    }

    fn create_sampler(
        &self,
        context: RawHandle,
        normalized_coords: bool,
        addressing: AddressingMode,
        filter: FilterMode,
    ) -> Result<RawHandle, ErrorCode> {
        self.table.context(context)?;
        if !normalized_coords
            && matches!(
                addressing,
                AddressingMode::Repeat | AddressingMode::MirroredRepeat
            )
        {
            return Err(ErrorCode::INVALID_VALUE);
        }
        Ok(self.table.add(Object::Sampler(Arc::new(SamplerState {
            context,
            desc: SamplerDesc {
                normalized_coords,
                addressing,
                filter,
            },
        }))))
    }

    fn create_user_event(&self, context: RawHandle) -> Result<RawHandle, ErrorCode> {
        self.table.context(context)?;
        let handle = self.table.alloc();
        let event = EventState::user(handle, context, self.epoch);
        self.table.insert(handle, Object::Event(Arc::new(event)));
        Ok(handle)
    }

    fn set_user_event_status(&self, event: RawHandle, status: i32) -> Result<(), ErrorCode> {
        let e = self.table.event(event)?;
        if !e.user {
            return Err(ErrorCode::INVALID_EVENT);
        }
        if status > ExecStatus::RAW_COMPLETE {
            return Err(ErrorCode::INVALID_VALUE);
        }
        if !e.advance(status, &self.callbacks) {
            return Err(ErrorCode::INVALID_OPERATION);
        }
        self.user_event_updates.fetch_add(1, Relaxed);
        Ok(())
    }

    fn create_program_with_source(
        &self,
        context: RawHandle,
        source: &str,
    ) -> Result<RawHandle, ErrorCode> {
        let ctx = self.table.context(context)?;
        if source.is_empty() {
            return Err(ErrorCode::INVALID_VALUE);
        }
        Ok(self.table.add(Object::Program(Arc::new(ProgramState {
            context,
            devices: ctx.devices.clone(),
            source: source.into(),
            build: Default::default(),
        }))))
    }

    fn build_program(
        &self,
        program: RawHandle,
        devices: &[RawHandle],
        options: &str,
    ) -> Result<(), ErrorCode> {
        let p = self.table.program(program)?;
        let targets = if devices.is_empty() {
            p.devices.clone()
        } else if devices.iter().all(|d| p.devices.contains(d)) {
            devices.to_vec()
        } else {
            return Err(ErrorCode::INVALID_DEVICE);
        };

        let mut build = p.build.lock().unwrap();
        if let Err(option) = compiler::check_options(options) {
            let log = format!("unknown build option `{option}`");
            for d in targets {
                build.logs.insert(d, log.clone());
            }
            return Err(ErrorCode::INVALID_BUILD_OPTIONS);
        }
        let (result, log) = match compiler::scan(&p.source).and_then(|sigs| self.link(sigs)) {
            Ok(kernels) => {
                debug!("program {program:?} built with {} kernel(s)", kernels.len());
                build.kernels = Some(kernels);
                (Ok(()), String::new())
            }
            Err(errors) => {
                build.kernels = None;
                let log = errors
                    .iter()
                    .map(Diagnostic::to_string)
                    .collect::<Vec<_>>()
                    .join("\n");
                (Err(ErrorCode::BUILD_PROGRAM_FAILURE), log)
            }
        };
        for d in targets {
            build.logs.insert(d, log.clone());
        }
        result
    }

    fn program_build_log(
        &self,
        program: RawHandle,
        device: RawHandle,
        out: Option<&mut [u8]>,
    ) -> Result<usize, ErrorCode> {
        let p = self.table.program(program)?;
        if !p.devices.contains(&device) {
            return Err(ErrorCode::INVALID_DEVICE);
        }
        let build = p.build.lock().unwrap();
        let log = build.logs.get(&device).map_or("", String::as_str);
        answer(&c_string(log), out)
    }

    fn program_kernel_names(
        &self,
        program: RawHandle,
        out: Option<&mut [u8]>,
    ) -> Result<usize, ErrorCode> {
        let p = self.table.program(program)?;
        let build = p.build.lock().unwrap();
        let Some(kernels) = &build.kernels else {
            return Err(ErrorCode::INVALID_PROGRAM_EXECUTABLE);
        };
        let names = kernels
            .iter()
            .map(|k| k.name.as_str())
            .collect::<Vec<_>>()
            .join(";");
        answer(&c_string(&names), out)
    }

    fn create_kernel(&self, program: RawHandle, name: &str) -> Result<RawHandle, ErrorCode> {
        let p = self.table.program(program)?;
        let def = {
            let build = p.build.lock().unwrap();
            let Some(kernels) = &build.kernels else {
                return Err(ErrorCode::INVALID_PROGRAM_EXECUTABLE);
            };
            kernels
                .iter()
                .find(|k| k.name == name)
                .cloned()
                .ok_or(ErrorCode::INVALID_KERNEL_NAME)?
        };
        Ok(self
            .table
            .add(Object::Kernel(Arc::new(KernelState::new(p.context, def)))))
    }

    fn kernel_info(
        &self,
        kernel: RawHandle,
        param: KernelParam,
        out: Option<&mut [u8]>,
    ) -> Result<usize, ErrorCode> {
        let k = self.table.kernel(kernel)?;
        let val = match param {
            KernelParam::FunctionName => c_string(&k.def.name),
            KernelParam::NumArgs => bytes(k.def.params.len() as u32),
        };
        answer(&val, out)
    }

    unsafe fn set_kernel_arg(
        &self,
        kernel: RawHandle,
        index: u32,
        size: usize,
        value: *const c_void,
    ) -> Result<(), ErrorCode> {
        let k = self.table.kernel(kernel)?;
        let handle = || -> Result<RawHandle, ErrorCode> {
            if size != size_of::<RawHandle>() {
                Err(ErrorCode::INVALID_ARG_SIZE)
            } else if value.is_null() {
                Ok(RawHandle::NULL)
            } else {
                Ok(value.cast::<RawHandle>().read_unaligned())
            }
        };
        let arg = match k.param(index)? {
            ParamKind::Global | ParamKind::Constant => {
                let handle = handle()?;
                if handle.is_null() {
                    ArgValue::Mem(None)
                } else {
                    let mem = self.table.mem(handle)?;
                    if mem.ty != MemObjectType::Buffer || mem.context != k.context {
                        return Err(ErrorCode::INVALID_MEM_OBJECT);
                    }
                    ArgValue::Mem(Some(mem))
                }
            }
            ParamKind::Local => {
                if !value.is_null() {
                    return Err(ErrorCode::INVALID_ARG_VALUE);
                }
                if size == 0 {
                    return Err(ErrorCode::INVALID_ARG_SIZE);
                }
                ArgValue::Local(size)
            }
            ParamKind::Image => {
                let mem = self.table.mem(handle()?)?;
                match mem.image {
                    Some(info) if mem.context == k.context => ArgValue::Image(mem, info),
                    _ => return Err(ErrorCode::INVALID_MEM_OBJECT),
                }
            }
            ParamKind::Sampler => {
                let sampler = self.table.sampler(handle()?)?;
                if sampler.context != k.context {
                    return Err(ErrorCode::INVALID_SAMPLER);
                }
                ArgValue::Sampler(sampler.desc)
            }
            ParamKind::Value(expect) => {
                if value.is_null() {
                    return Err(ErrorCode::INVALID_ARG_VALUE);
                }
                if size != expect {
                    return Err(ErrorCode::INVALID_ARG_SIZE);
                }
                ArgValue::Bytes(from_raw_parts(value.cast::<u8>(), size).to_vec())
            }
        };
        k.args.lock().unwrap()[index as usize] = Some(arg);
        Ok(())
    }

    fn enqueue_nd_range_kernel(
        &self,
        queue: RawHandle,
        kernel: RawHandle,
        range: &NdRange,
        wait: &[RawHandle],
    ) -> Result<RawHandle, ErrorCode> {
        let q = self.table.queue(queue)?;
        let k = self.table.kernel(kernel)?;
        if k.context != q.context {
            return Err(ErrorCode::INVALID_CONTEXT);
        }
        if !(1..=3).contains(&range.work_dim) {
            return Err(ErrorCode::INVALID_WORK_DIMENSION);
        }
        let dims = range.work_dim as usize;
        let mut global = range.global;
        let mut offset = range.offset.unwrap_or_default();
        for d in dims..3 {
            global[d] = 1;
            offset[d] = 0;
        }
        if global.contains(&0) {
            return Err(ErrorCode::INVALID_GLOBAL_WORK_SIZE);
        }
        if (0..3).any(|d| offset[d].checked_add(global[d]).is_none()) {
            return Err(ErrorCode::INVALID_GLOBAL_OFFSET);
        }

        let device = self.table.device(q.device)?;
        let max_wg = device.config.max_work_group_size;
        let local = match range.local {
            Some(mut local) => {
                for l in &mut local[dims..] {
                    *l = 1
                }
                if local.iter().any(|&l| l > max_wg) {
                    return Err(ErrorCode::INVALID_WORK_ITEM_SIZE);
                }
                if (0..3).any(|d| local[d] == 0 || global[d] % local[d] != 0)
                    || local.iter().product::<usize>() > max_wg
                {
                    return Err(ErrorCode::INVALID_WORK_GROUP_SIZE);
                }
                local
            }
            None => [gcd(global[0], max_wg), 1, 1],
        };

        let args = k
            .args
            .lock()
            .unwrap()
            .iter()
            .cloned()
            .collect::<Option<Vec<_>>>()
            .ok_or(ErrorCode::INVALID_KERNEL_ARGS)?;
        let local_mem = args
            .iter()
            .map(|arg| match arg {
                ArgValue::Local(size) => *size,
                _ => 0,
            })
            .sum::<usize>();
        if local_mem as u64 > device.config.local_mem_size {
            return Err(ErrorCode::OUT_OF_RESOURCES);
        }

        let geometry = Geometry {
            work_dim: range.work_dim,
            offset,
            local,
            groups: [0, 1, 2].map(|d| global[d] / local[d]),
        };
        let body = k.def.body.clone();
        debug!(
            "launch `{}` with {:?} groups of {:?}",
            k.def.name, geometry.groups, geometry.local
        );
        let job: Job = Box::new(move || {
            exec::run(&*body, geometry, &args);
            Ok(())
        });
        let event = self.enqueue(&q, queue, wait, Command::Normal, job)?;
        Ok(event.handle)
    }

    unsafe fn enqueue_read_buffer(
        &self,
        queue: RawHandle,
        buffer: RawHandle,
        blocking: bool,
        offset: usize,
        size: usize,
        dst: *mut c_void,
        wait: &[RawHandle],
    ) -> Result<RawHandle, ErrorCode> {
        let q = self.table.queue(queue)?;
        let buf = self.buffer_in(&q, buffer)?;
        if !buf.host_readable() {
            return Err(ErrorCode::INVALID_OPERATION);
        }
        check_range(offset, size, buf.size)?;
        if dst.is_null() {
            return Err(ErrorCode::INVALID_VALUE);
        }
        let dst = HostPtr(dst.cast());
        let job: Job = Box::new(move || {
            unsafe { copy_nonoverlapping(buf.storage.ptr().add(offset), dst.get(), size) };
            Ok(())
        });
        let event = self.enqueue(&q, queue, wait, Command::Normal, job)?;
        self.finish_command(event, blocking)
    }

    unsafe fn enqueue_write_buffer(
        &self,
        queue: RawHandle,
        buffer: RawHandle,
        blocking: bool,
        offset: usize,
        size: usize,
        src: *const c_void,
        wait: &[RawHandle],
    ) -> Result<RawHandle, ErrorCode> {
        let q = self.table.queue(queue)?;
        let buf = self.buffer_in(&q, buffer)?;
        if !buf.host_writable() {
            return Err(ErrorCode::INVALID_OPERATION);
        }
        check_range(offset, size, buf.size)?;
        if src.is_null() {
            return Err(ErrorCode::INVALID_VALUE);
        }
        let src = HostPtr(src.cast_mut().cast());
        let job: Job = Box::new(move || {
            unsafe { copy_nonoverlapping(src.get(), buf.storage.ptr().add(offset), size) };
            Ok(())
        });
        let event = self.enqueue(&q, queue, wait, Command::Normal, job)?;
        self.finish_command(event, blocking)
    }

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
    ) -> Result<RawHandle, ErrorCode> {
        self.transfer_image(
            queue,
            image,
            blocking,
            origin,
            region,
            row_pitch,
            slice_pitch,
            dst.cast(),
            wait,
            true,
        )
    }

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
    ) -> Result<RawHandle, ErrorCode> {
        self.transfer_image(
            queue,
            image,
            blocking,
            origin,
            region,
            row_pitch,
            slice_pitch,
            src.cast_mut().cast(),
            wait,
            false,
        )
    }

    fn enqueue_copy_buffer(
        &self,
        queue: RawHandle,
        src: RawHandle,
        dst: RawHandle,
        src_offset: usize,
        dst_offset: usize,
        size: usize,
        wait: &[RawHandle],
    ) -> Result<RawHandle, ErrorCode> {
        let q = self.table.queue(queue)?;
        let from = self.buffer_in(&q, src)?;
        let to = self.buffer_in(&q, dst)?;
        check_range(src_offset, size, from.size)?;
        check_range(dst_offset, size, to.size)?;
        if src == dst && src_offset < dst_offset + size && dst_offset < src_offset + size {
            return Err(ErrorCode::MEM_COPY_OVERLAP);
        }
        let job: Job = Box::new(move || {
            unsafe {
                copy(
                    from.storage.ptr().add(src_offset),
                    to.storage.ptr().add(dst_offset),
                    size,
                )
            };
            Ok(())
        });
        Ok(self.enqueue(&q, queue, wait, Command::Normal, job)?.handle)
    }

    fn enqueue_copy_image(
        &self,
        queue: RawHandle,
        src: RawHandle,
        dst: RawHandle,
        src_origin: [usize; 3],
        dst_origin: [usize; 3],
        region: [usize; 3],
        wait: &[RawHandle],
    ) -> Result<RawHandle, ErrorCode> {
        let q = self.table.queue(queue)?;
        let (from, from_info) = self.image_in(&q, src)?;
        let (to, to_info) = self.image_in(&q, dst)?;
        if from_info.format != to_info.format {
            return Err(ErrorCode::IMAGE_FORMAT_MISMATCH);
        }
        check_region(&from_info, src_origin, region)?;
        check_region(&to_info, dst_origin, region)?;
        if src == dst && (0..3).all(|d| {
            src_origin[d] < dst_origin[d] + region[d] && dst_origin[d] < src_origin[d] + region[d]
        }) {
            return Err(ErrorCode::MEM_COPY_OVERLAP);
        }
        let pixel = from_info.format.pixel_size();
        let job: Job = Box::new(move || {
            let src = Layout {
                ptr: from.storage.ptr(),
                pitches: from_info.pitches(),
            }
            .at([src_origin[0] * pixel, src_origin[1], src_origin[2]]);
            let dst = Layout {
                ptr: to.storage.ptr(),
                pitches: to_info.pitches(),
            }
            .at([dst_origin[0] * pixel, dst_origin[1], dst_origin[2]]);
            unsafe { copy_region(src, dst, region[0] * pixel, region[1], region[2]) };
            Ok(())
        });
        Ok(self.enqueue(&q, queue, wait, Command::Normal, job)?.handle)
    }

    fn enqueue_copy_image_to_buffer(
        &self,
        queue: RawHandle,
        src: RawHandle,
        dst: RawHandle,
        src_origin: [usize; 3],
        region: [usize; 3],
        dst_offset: usize,
        wait: &[RawHandle],
    ) -> Result<RawHandle, ErrorCode> {
        let q = self.table.queue(queue)?;
        let (from, info) = self.image_in(&q, src)?;
        let to = self.buffer_in(&q, dst)?;
        check_region(&info, src_origin, region)?;
        let pixel = info.format.pixel_size();
        let row = region[0] * pixel;
        check_range(dst_offset, row * region[1] * region[2], to.size)?;
        let job: Job = Box::new(move || {
            let src = Layout {
                ptr: from.storage.ptr(),
                pitches: info.pitches(),
            }
            .at([src_origin[0] * pixel, src_origin[1], src_origin[2]]);
            let dst = Layout {
                ptr: unsafe { to.storage.ptr().add(dst_offset) },
                pitches: [row, row * region[1]],
            };
            unsafe { copy_region(src, dst, row, region[1], region[2]) };
            Ok(())
        });
        Ok(self.enqueue(&q, queue, wait, Command::Normal, job)?.handle)
    }

    fn enqueue_copy_buffer_to_image(
        &self,
        queue: RawHandle,
        src: RawHandle,
        dst: RawHandle,
        src_offset: usize,
        dst_origin: [usize; 3],
        region: [usize; 3],
        wait: &[RawHandle],
    ) -> Result<RawHandle, ErrorCode> {
        let q = self.table.queue(queue)?;
        let from = self.buffer_in(&q, src)?;
        let (to, info) = self.image_in(&q, dst)?;
        check_region(&info, dst_origin, region)?;
        let pixel = info.format.pixel_size();
        let row = region[0] * pixel;
        check_range(src_offset, row * region[1] * region[2], from.size)?;
        let job: Job = Box::new(move || {
            let src = Layout {
                ptr: unsafe { from.storage.ptr().add(src_offset) },
                pitches: [row, row * region[1]],
            };
            let dst = Layout {
                ptr: to.storage.ptr(),
                pitches: info.pitches(),
            }
            .at([dst_origin[0] * pixel, dst_origin[1], dst_origin[2]]);
            unsafe { copy_region(src, dst, row, region[1], region[2]) };
            Ok(())
        });
        Ok(self.enqueue(&q, queue, wait, Command::Normal, job)?.handle)
    }

    fn enqueue_fill_buffer(
        &self,
        queue: RawHandle,
        buffer: RawHandle,
        pattern: &[u8],
        offset: usize,
        size: usize,
        wait: &[RawHandle],
    ) -> Result<RawHandle, ErrorCode> {
        let q = self.table.queue(queue)?;
        let buf = self.buffer_in(&q, buffer)?;
        let len = pattern.len();
        if len == 0 || offset % len != 0 || size % len != 0 {
            return Err(ErrorCode::INVALID_VALUE);
        }
        check_range(offset, size, buf.size)?;
        let pattern = pattern.to_vec();
        let job: Job = Box::new(move || {
            let base = unsafe { buf.storage.ptr().add(offset) };
            for i in (0..size).step_by(len) {
                unsafe { copy_nonoverlapping(pattern.as_ptr(), base.add(i), len) }
            }
            Ok(())
        });
        Ok(self.enqueue(&q, queue, wait, Command::Normal, job)?.handle)
    }

    fn enqueue_fill_image(
        &self,
        queue: RawHandle,
        image: RawHandle,
        color: FillColor,
        origin: [usize; 3],
        region: [usize; 3],
        wait: &[RawHandle],
    ) -> Result<RawHandle, ErrorCode> {
        let q = self.table.queue(queue)?;
        let (img, info) = self.image_in(&q, image)?;
        check_region(&info, origin, region)?;
        let pixel = encode(info.format, color)?;
        let job: Job = Box::new(move || {
            let dst = Layout {
                ptr: img.storage.ptr(),
                pitches: info.pitches(),
            }
            .at([origin[0] * pixel.len(), origin[1], origin[2]]);
            unsafe { fill_region(dst, &pixel, region[0], region[1], region[2]) };
            Ok(())
        });
        Ok(self.enqueue(&q, queue, wait, Command::Normal, job)?.handle)
    }

    fn enqueue_marker(&self, queue: RawHandle, wait: &[RawHandle]) -> Result<RawHandle, ErrorCode> {
        let q = self.table.queue(queue)?;
        let event = self.enqueue(&q, queue, wait, Command::Marker, Box::new(|| Ok(())))?;
        Ok(event.handle)
    }

    fn enqueue_barrier(
        &self,
        queue: RawHandle,
        wait: &[RawHandle],
    ) -> Result<RawHandle, ErrorCode> {
        let q = self.table.queue(queue)?;
        let event = self.enqueue(&q, queue, wait, Command::Barrier, Box::new(|| Ok(())))?;
        Ok(event.handle)
    }

    fn flush(&self, queue: RawHandle) -> Result<(), ErrorCode> {
        // 命令在依赖解除时立即提交，没有需要冲刷的缓冲
        self.table.queue(queue).map(drop)
    }

    fn finish(&self, queue: RawHandle) -> Result<(), ErrorCode> {
        let q = self.table.queue(queue)?;
        let outstanding = {
            let mut order = q.order.lock().unwrap();
            order.prune();
            order.outstanding.clone()
        };
        for e in outstanding {
            e.wait();
        }
        Ok(())
    }

    fn wait_for_events(&self, events: &[RawHandle]) -> Result<(), ErrorCode> {
        let Some(&first) = events.first() else {
            return Err(ErrorCode::INVALID_VALUE);
        };
        let context = self.table.event(first)?.context;
        let events = events
            .iter()
            .map(|&h| {
                let e = self.table.event(h)?;
                if e.context == context {
                    Ok(e)
                } else {
                    Err(ErrorCode::INVALID_CONTEXT)
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        let mut failed = false;
        for e in events {
            failed |= e.wait() < 0;
        }
        if failed {
            Err(ErrorCode::EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST)
        } else {
            Ok(())
        }
    }

    fn event_status(&self, event: RawHandle) -> Result<i32, ErrorCode> {
        Ok(self.table.event(event)?.status())
    }

    fn set_event_callback(
        &self,
        event: RawHandle,
        threshold: i32,
        callback: EventCallback,
    ) -> Result<(), ErrorCode> {
        let e = self.table.event(event)?;
        if !(ExecStatus::RAW_COMPLETE..=ExecStatus::RAW_SUBMITTED).contains(&threshold) {
            return Err(ErrorCode::INVALID_VALUE);
        }
        e.on_status(threshold, callback, &self.callbacks);
        Ok(())
    }

    fn event_profiling(&self, event: RawHandle, param: ProfilingParam) -> Result<u64, ErrorCode> {
        self.table.event(event)?.profiling(param)
    }

    fn release(&self, kind: ObjectKind, handle: RawHandle) -> Result<(), ErrorCode> {
        self.table.remove(kind, handle)?;
        trace!("released {kind:?} {handle:?}");
        Ok(())
    }
}

#[inline]
fn bytes<T: Pod>(val: T) -> Vec<u8> {
    bytemuck::bytes_of(&val).to_vec()
}

#[inline]
fn c_string(s: &str) -> Vec<u8> {
    let mut ans = Vec::with_capacity(s.len() + 1);
    ans.extend_from_slice(s.as_bytes());
    ans.push(0);
    ans
}

#[inline]
const fn max_mem_alloc(global: u64) -> u64 {
    global / 4
}

#[inline]
const fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        let rem = a % b;
        a = b;
        b = rem;
    }
    a
}

/// 访问方式、宿主访问方式各自至多一种，`USE_HOST_PTR` 与其他分配策略互斥。
fn check_flags(flags: MemFlags) -> Result<(), ErrorCode> {
    let access = MemFlags::READ_WRITE | MemFlags::WRITE_ONLY | MemFlags::READ_ONLY;
    let host = MemFlags::HOST_WRITE_ONLY | MemFlags::HOST_READ_ONLY | MemFlags::HOST_NO_ACCESS;
    if !MemFlags::all().contains(flags)
        || (flags & access).bits().count_ones() > 1
        || (flags & host).bits().count_ones() > 1
        || (flags.contains(MemFlags::USE_HOST_PTR)
            && flags.intersects(MemFlags::ALLOC_HOST_PTR | MemFlags::COPY_HOST_PTR))
    {
        Err(ErrorCode::INVALID_VALUE)
    } else {
        Ok(())
    }
}

fn check_range(offset: usize, size: usize, total: usize) -> Result<(), ErrorCode> {
    match offset.checked_add(size) {
        Some(end) if size > 0 && end <= total => Ok(()),
        _ => Err(ErrorCode::INVALID_VALUE),
    }
}

fn check_region(info: &ImageInfo, origin: [usize; 3], region: [usize; 3]) -> Result<(), ErrorCode> {
    let extent = info.desc.region();
    if (0..3).all(|d| {
        region[d] > 0
            && origin[d]
                .checked_add(region[d])
                .is_some_and(|end| end <= extent[d])
    }) {
        Ok(())
    } else {
        Err(ErrorCode::INVALID_VALUE)
    }
}

fn check_image_size(desc: &ImageDesc) -> Result<(), ErrorCode> {
    use MemObjectType as Ty;
    let ok = match desc.ty {
        Ty::Buffer => false,
        Ty::Image1D | Ty::Image1DBuffer => desc.width <= IMAGE2D_MAX[0],
        Ty::Image1DArray => desc.width <= IMAGE2D_MAX[0] && desc.array_size <= IMAGE_MAX_ARRAY_SIZE,
        Ty::Image2D => desc.width <= IMAGE2D_MAX[0] && desc.height <= IMAGE2D_MAX[1],
        Ty::Image2DArray => {
            desc.width <= IMAGE2D_MAX[0]
                && desc.height <= IMAGE2D_MAX[1]
                && desc.array_size <= IMAGE_MAX_ARRAY_SIZE
        }
        Ty::Image3D => {
            desc.width <= IMAGE3D_MAX[0]
                && desc.height <= IMAGE3D_MAX[1]
                && desc.depth <= IMAGE3D_MAX[2]
        }
    };
    if ok {
        Ok(())
    } else {
        Err(ErrorCode::INVALID_IMAGE_SIZE)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_utils::{runtime, test_config};
    use std::ptr::{null, null_mut};

    fn platform_and_device(rt: &CpuRuntime) -> (RawHandle, RawHandle) {
        let mut platforms = [RawHandle::NULL; 2];
        assert_eq!(rt.platform_ids(Some(&mut platforms)).unwrap(), 2);
        let mut device = [RawHandle::NULL];
        rt.device_ids(platforms[0], DeviceType::CPU, Some(&mut device))
            .unwrap();
        (platforms[0], device[0])
    }

    #[test]
    fn test_discovery() {
        let rt = CpuRuntime::new(&test_config()).unwrap();
        let (platform, device) = platform_and_device(&rt);
        assert_eq!(rt.platform_ids(None).unwrap(), 2);
        assert_eq!(
            rt.device_ids(platform, DeviceType::GPU, None),
            Err(ErrorCode::DEVICE_NOT_FOUND)
        );
        assert_eq!(
            rt.device_ids(platform, DeviceType::empty(), None),
            Err(ErrorCode::INVALID_DEVICE_TYPE)
        );
        assert_eq!(rt.device_ids(platform, DeviceType::DEFAULT, None), Ok(1));
        assert_eq!(
            rt.device_ids(device, DeviceType::ALL, None),
            Err(ErrorCode::INVALID_PLATFORM)
        );

        let mut short = [0u8; 2];
        assert_eq!(
            rt.device_info(device, DeviceParam::Name, Some(&mut short)),
            Err(ErrorCode::INVALID_VALUE)
        );
        let mut owner = [0u8; size_of::<usize>()];
        rt.device_info(device, DeviceParam::Platform, Some(&mut owner))
            .unwrap();
        assert_eq!(usize::from_ne_bytes(owner), platform.0);
    }

    #[test]
    fn test_create_checks() {
        let rt = CpuRuntime::new(&test_config()).unwrap();
        let (platform, device) = platform_and_device(&rt);
        assert_eq!(rt.create_context(&[]), Err(ErrorCode::INVALID_VALUE));
        assert_eq!(rt.create_context(&[platform]), Err(ErrorCode::INVALID_DEVICE));
        let ctx = rt.create_context(&[device]).unwrap();

        let flags = MemFlags::READ_ONLY | MemFlags::WRITE_ONLY;
        let e = unsafe { rt.create_buffer(ctx, flags, 16, null_mut()) };
        assert_eq!(e, Err(ErrorCode::INVALID_VALUE));
        let mut host = [0u8; 16];
        let e = unsafe {
            rt.create_buffer(ctx, MemFlags::READ_WRITE, 16, host.as_mut_ptr().cast())
        };
        assert_eq!(e, Err(ErrorCode::INVALID_HOST_PTR));
        let e = unsafe { rt.create_buffer(ctx, MemFlags::READ_WRITE, usize::MAX, null_mut()) };
        assert_eq!(e, Err(ErrorCode::INVALID_BUFFER_SIZE));

        assert_eq!(
            rt.create_sampler(ctx, false, AddressingMode::Repeat, FilterMode::Nearest),
            Err(ErrorCode::INVALID_VALUE)
        );
        assert_eq!(
            rt.create_program_with_source(ctx, ""),
            Err(ErrorCode::INVALID_VALUE)
        );
        assert_eq!(
            rt.create_command_queue(ctx, platform, QueueProperties::empty()),
            Err(ErrorCode::INVALID_DEVICE)
        );
    }

    #[test]
    fn test_build_log() {
        let rt = CpuRuntime::new(&test_config()).unwrap();
        let (_, device) = platform_and_device(&rt);
        let ctx = rt.create_context(&[device]).unwrap();
        let program = rt
            .create_program_with_source(ctx, "__kernel void unknown(__global int* x) {}")
            .unwrap();
        assert_eq!(
            rt.program_kernel_names(program, None),
            Err(ErrorCode::INVALID_PROGRAM_EXECUTABLE)
        );
        assert_eq!(
            rt.build_program(program, &[], "-O9"),
            Err(ErrorCode::INVALID_BUILD_OPTIONS)
        );
        assert_eq!(
            rt.build_program(program, &[], ""),
            Err(ErrorCode::BUILD_PROGRAM_FAILURE)
        );
        let len = rt.program_build_log(program, device, None).unwrap();
        let mut log = vec![0u8; len];
        rt.program_build_log(program, device, Some(&mut log)).unwrap();
        let log = String::from_utf8(log).unwrap();
        assert!(log.contains("`unknown` has no registered implementation"));
        assert_eq!(
            rt.create_kernel(program, "unknown"),
            Err(ErrorCode::INVALID_PROGRAM_EXECUTABLE)
        );
    }

    #[test]
    fn test_kernel_panic() {
        let rt = CpuRuntime::new(&test_config()).unwrap();
        unsafe { rt.register_kernel("boom", |_, _| panic!("boom")) };
        let (_, device) = platform_and_device(&rt);
        let ctx = rt.create_context(&[device]).unwrap();
        let queue = rt
            .create_command_queue(ctx, device, QueueProperties::empty())
            .unwrap();
        let program = rt
            .create_program_with_source(ctx, "kernel void boom() {}")
            .unwrap();
        rt.build_program(program, &[], "").unwrap();
        let kernel = rt.create_kernel(program, "boom").unwrap();
        let event = rt
            .enqueue_nd_range_kernel(queue, kernel, &NdRange::new(&[4]), &[])
            .unwrap();
        assert_eq!(
            rt.wait_for_events(&[event]),
            Err(ErrorCode::EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST)
        );
        assert_eq!(rt.event_status(event), Ok(ErrorCode::OUT_OF_RESOURCES.0));

        // 顺序队列中后续命令不受影响
        let marker = rt.enqueue_marker(queue, &[]).unwrap();
        rt.finish(queue).unwrap();
        assert_eq!(rt.event_status(marker), Ok(ExecStatus::RAW_COMPLETE));
        assert_eq!(rt.stats().commands_submitted, 2);
    }

    #[test]
    fn test_host_access() {
        let rt = CpuRuntime::new(&test_config()).unwrap();
        let (_, device) = platform_and_device(&rt);
        let ctx = rt.create_context(&[device]).unwrap();
        let queue = rt
            .create_command_queue(ctx, device, QueueProperties::empty())
            .unwrap();
        let buf = unsafe {
            rt.create_buffer(ctx, MemFlags::HOST_WRITE_ONLY, 8, null_mut())
                .unwrap()
        };
        let mut out = [0u8; 8];
        let e = unsafe {
            rt.enqueue_read_buffer(queue, buf, true, 0, 8, out.as_mut_ptr().cast(), &[])
        };
        assert_eq!(e, Err(ErrorCode::INVALID_OPERATION));
        unsafe { rt.enqueue_write_buffer(queue, buf, true, 0, 8, out.as_ptr().cast(), &[]) }
            .unwrap();

        let e = unsafe { rt.set_kernel_arg(RawHandle(usize::MAX), 0, 0, null()) };
        assert_eq!(e, Err(ErrorCode::INVALID_KERNEL));
    }

    #[test]
    fn test_shared_runtime() {
        // 测试工具的运行时已经注册了核函数
        let rt = runtime();
        assert_eq!(rt.name(), CpuRuntime::NAME);
        assert_eq!(gcd(1000, 256), 8);
        assert_eq!(gcd(64, 256), 64);
    }
}
