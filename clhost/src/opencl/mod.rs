//! 系统安装的 OpenCL 库。
//!
//! 每个 [`Runtime`] 方法直接转发到对应的 OpenCL 1.2 入口，句柄即 OpenCL 对象指针。

mod ffi;

use crate::{
    error::functions::precondition,
    info::answer_with,
    AddressingMode, ChannelOrder, ChannelType, DeviceParam, DeviceType, Error, ErrorCode,
    EventCallback, FillColor, FilterMode, ImageDesc, ImageFormat, KernelParam, MemFlags,
    MemObjectType, NdRange, ObjectKind, PlatformParam, ProfilingParam, QueueProperties, RawHandle,
    Runtime,
};
use ffi::{Api, H};
use libloading::Library;
use log::{error, info, warn};
use std::{
    env,
    ffi::{c_void, CString},
    mem::size_of,
    panic::{catch_unwind, AssertUnwindSafe},
    ptr::{null, null_mut},
};

pub struct ClRuntime {
    api: Api,
    _lib: Library,
}

impl ClRuntime {
    pub const NAME: &'static str = "opencl";
    /// 指定 OpenCL 库路径的环境变量。
    pub const ENV_LIBRARY: &'static str = "CLHOST_OPENCL_LIBRARY";

    const CANDIDATES: &'static [&'static str] = if cfg!(windows) {
        &["OpenCL.dll"]
    } else if cfg!(target_os = "macos") {
        &["/System/Library/Frameworks/OpenCL.framework/OpenCL"]
    } else {
        &["libOpenCL.so.1", "libOpenCL.so"]
    };

    /// 加载 OpenCL 库，要求至少有一个平台。
    pub fn load() -> Result<Self, Error> {
        let candidates = match env::var(Self::ENV_LIBRARY) {
            Ok(path) if !path.trim().is_empty() => vec![path],
            _ => Self::CANDIDATES.iter().map(|s| s.to_string()).collect(),
        };
        let mut errors = vec![];
        for path in candidates {
            let lib = match unsafe { Library::new(&path) } {
                Ok(lib) => lib,
                Err(e) => {
                    errors.push(format!("{path}: {e}"));
                    continue;
                }
            };
            let api = match unsafe { Api::load(&lib) } {
                Ok(api) => api,
                Err(e) => {
                    warn!("{path} is not an OpenCL 1.2 library: {e}");
                    errors.push(format!("{path}: {e}"));
                    continue;
                }
            };
            let ans = Self { api, _lib: lib };
            match ans.platform_ids(None) {
                Ok(n) if n > 0 => {
                    info!("loaded {path} with {n} platform(s)");
                    return Ok(ans);
                }
                Ok(_) => errors.push(format!("{path}: no platform")),
                Err(code) => errors.push(format!("{path}: {code}")),
            }
        }
        Err(precondition(format!(
            "cannot load OpenCL ({})",
            errors.join("; ")
        )))
    }
}

#[inline]
fn raw(handle: RawHandle) -> H {
    handle.0 as _
}

#[inline]
fn handle(ptr: H) -> RawHandle {
    RawHandle(ptr as _)
}

#[inline]
fn list(handles: &[RawHandle]) -> (u32, *const H) {
    if handles.is_empty() {
        (0, null())
    } else {
        (handles.len() as _, handles.as_ptr().cast())
    }
}

#[inline]
fn check(code: i32) -> Result<(), ErrorCode> {
    ErrorCode(code).check()
}

/// 以错误码出参返回对象的创建调用。
#[inline]
fn create(f: impl FnOnce(*mut i32) -> H) -> Result<RawHandle, ErrorCode> {
    let mut code = 0;
    let ptr = f(&mut code);
    check(code)?;
    Ok(handle(ptr))
}

/// `clGet*Info` 族的两次调用查询。
fn query(
    out: Option<&mut [u8]>,
    f: impl FnOnce(usize, *mut c_void, *mut usize) -> i32,
) -> Result<usize, ErrorCode> {
    let mut len = 0;
    match out {
        None => check(f(0, null_mut(), &mut len))?,
        Some(out) => check(f(out.len(), out.as_mut_ptr().cast(), &mut len))?,
    }
    Ok(len)
}

fn ids(
    out: Option<&mut [RawHandle]>,
    f: impl FnOnce(u32, *mut H, *mut u32) -> i32,
) -> Result<usize, ErrorCode> {
    let mut n = 0;
    match out {
        None => {
            check(f(0, null_mut(), &mut n))?;
            Ok(n as _)
        }
        Some(out) => {
            check(f(out.len() as _, out.as_mut_ptr().cast(), &mut n))?;
            Ok(out.len().min(n as _))
        }
    }
}

/// 入队调用，返回新事件。
fn enqueue(wait: &[RawHandle], f: impl FnOnce(u32, *const H, *mut H) -> i32) -> Result<RawHandle, ErrorCode> {
    let (n, wait) = list(wait);
    let mut event = null_mut();
    check(f(n, wait, &mut event))?;
    Ok(handle(event))
}

unsafe extern "C" fn notify(_: H, status: i32, user: *mut c_void) {
    let f = Box::from_raw(user.cast::<EventCallback>());
    if catch_unwind(AssertUnwindSafe(move || f(status))).is_err() {
        error!("event callback panicked")
    }
}

impl Runtime for ClRuntime {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn platform_ids(&self, out: Option<&mut [RawHandle]>) -> Result<usize, ErrorCode> {
        ids(out, |n, ptr, ret| unsafe { (self.api.clGetPlatformIDs)(n, ptr, ret) })
    }

    fn platform_info(
        &self,
        platform: RawHandle,
        param: PlatformParam,
        out: Option<&mut [u8]>,
    ) -> Result<usize, ErrorCode> {
        query(out, |len, ptr, ret| unsafe {
            (self.api.clGetPlatformInfo)(raw(platform), param as _, len, ptr, ret)
        })
    }

    fn device_ids(
        &self,
        platform: RawHandle,
        ty: DeviceType,
        out: Option<&mut [RawHandle]>,
    ) -> Result<usize, ErrorCode> {
        ids(out, |n, ptr, ret| unsafe {
            (self.api.clGetDeviceIDs)(raw(platform), ty.bits(), n, ptr, ret)
        })
    }

    fn device_info(
        &self,
        device: RawHandle,
        param: DeviceParam,
        out: Option<&mut [u8]>,
    ) -> Result<usize, ErrorCode> {
        query(out, |len, ptr, ret| unsafe {
            (self.api.clGetDeviceInfo)(raw(device), param as _, len, ptr, ret)
        })
    }

    fn create_context(&self, devices: &[RawHandle]) -> Result<RawHandle, ErrorCode> {
        let (n, devices) = list(devices);
        create(|code| unsafe {
            (self.api.clCreateContext)(null(), n, devices, null(), null_mut(), code)
        })
    }

    fn supported_image_formats(
        &self,
        context: RawHandle,
        flags: MemFlags,
        ty: MemObjectType,
        out: Option<&mut [ImageFormat]>,
    ) -> Result<usize, ErrorCode> {
        let f = self.api.clGetSupportedImageFormats;
        let mut n = 0;
        check(unsafe { f(raw(context), flags.bits(), ty as _, 0, null_mut(), &mut n) })?;
        let mut formats = (0..n)
            .map(|_| ffi::ImageFormat {
                order: 0,
                data_type: 0,
            })
            .collect::<Vec<_>>();
        if n > 0 {
            check(unsafe {
                f(raw(context), flags.bits(), ty as _, n, formats.as_mut_ptr(), null_mut())
            })?;
        }
        // 跳过不认识的通道
        let formats = formats
            .into_iter()
            .filter_map(|f| {
                Some(ImageFormat::new(
                    ChannelOrder::from_raw(f.order)?,
                    ChannelType::from_raw(f.data_type)?,
                ))
            })
            .collect::<Vec<_>>();
        answer_with(&formats, out)
    }

    fn create_command_queue(
        &self,
        context: RawHandle,
        device: RawHandle,
        properties: QueueProperties,
    ) -> Result<RawHandle, ErrorCode> {
        create(|code| unsafe {
            (self.api.clCreateCommandQueue)(raw(context), raw(device), properties.bits(), code)
        })
    }

    unsafe fn create_buffer(
        &self,
        context: RawHandle,
        flags: MemFlags,
        size: usize,
        host: *mut c_void,
    ) -> Result<RawHandle, ErrorCode> {
        create(|code| (self.api.clCreateBuffer)(raw(context), flags.bits(), size, host, code))
    }

    unsafe fn create_image(
        &self,
        context: RawHandle,
        flags: MemFlags,
        format: ImageFormat,
        desc: &ImageDesc,
        host: *mut c_void,
    ) -> Result<RawHandle, ErrorCode> {
        let format = ffi::ImageFormat {
            order: format.order as _,
            data_type: format.data_type as _,
        };
        let desc = ffi::ImageDesc {
            image_type: desc.ty as _,
            width: desc.width,
            height: desc.height,
            depth: desc.depth,
            array_size: desc.array_size,
            row_pitch: desc.row_pitch,
            slice_pitch: desc.slice_pitch,
            num_mip_levels: 0,
            num_samples: 0,
            buffer: raw(desc.buffer),
        };
        create(|code| {
            (self.api.clCreateImage)(raw(context), flags.bits(), &format, &desc, host, code)
        })
    }

    fn create_sampler(
        &self,
        context: RawHandle,
        normalized_coords: bool,
        addressing: AddressingMode,
        filter: FilterMode,
    ) -> Result<RawHandle, ErrorCode> {
        create(|code| unsafe {
            (self.api.clCreateSampler)(
                raw(context),
                normalized_coords as _,
                addressing as _,
                filter as _,
                code,
            )
        })
    }

    fn create_user_event(&self, context: RawHandle) -> Result<RawHandle, ErrorCode> {
        create(|code| unsafe { (self.api.clCreateUserEvent)(raw(context), code) })
    }

    fn set_user_event_status(&self, event: RawHandle, status: i32) -> Result<(), ErrorCode> {
        check(unsafe { (self.api.clSetUserEventStatus)(raw(event), status) })
    }

    fn create_program_with_source(
        &self,
        context: RawHandle,
        source: &str,
    ) -> Result<RawHandle, ErrorCode> {
        let ptr = source.as_ptr().cast();
        let len = source.len();
        create(|code| unsafe {
            (self.api.clCreateProgramWithSource)(raw(context), 1, &ptr, &len, code)
        })
    }

    fn build_program(
        &self,
        program: RawHandle,
        devices: &[RawHandle],
        options: &str,
    ) -> Result<(), ErrorCode> {
        let options = CString::new(options).map_err(|_| ErrorCode::INVALID_BUILD_OPTIONS)?;
        let (n, devices) = list(devices);
        check(unsafe {
            (self.api.clBuildProgram)(
                raw(program),
                n,
                devices,
                options.as_ptr(),
                null(),
                null_mut(),
            )
        })
    }

    fn program_build_log(
        &self,
        program: RawHandle,
        device: RawHandle,
        out: Option<&mut [u8]>,
    ) -> Result<usize, ErrorCode> {
        query(out, |len, ptr, ret| unsafe {
            (self.api.clGetProgramBuildInfo)(
                raw(program),
                raw(device),
                ffi::PROGRAM_BUILD_LOG,
                len,
                ptr,
                ret,
            )
        })
    }

    fn program_kernel_names(
        &self,
        program: RawHandle,
        out: Option<&mut [u8]>,
    ) -> Result<usize, ErrorCode> {
        query(out, |len, ptr, ret| unsafe {
            (self.api.clGetProgramInfo)(raw(program), ffi::PROGRAM_KERNEL_NAMES, len, ptr, ret)
        })
    }

    fn create_kernel(&self, program: RawHandle, name: &str) -> Result<RawHandle, ErrorCode> {
        let name = CString::new(name).map_err(|_| ErrorCode::INVALID_KERNEL_NAME)?;
        create(|code| unsafe { (self.api.clCreateKernel)(raw(program), name.as_ptr(), code) })
    }

    fn kernel_info(
        &self,
        kernel: RawHandle,
        param: KernelParam,
        out: Option<&mut [u8]>,
    ) -> Result<usize, ErrorCode> {
        query(out, |len, ptr, ret| unsafe {
            (self.api.clGetKernelInfo)(raw(kernel), param as _, len, ptr, ret)
        })
    }

    unsafe fn set_kernel_arg(
        &self,
        kernel: RawHandle,
        index: u32,
        size: usize,
        value: *const c_void,
    ) -> Result<(), ErrorCode> {
        check((self.api.clSetKernelArg)(raw(kernel), index, size, value))
    }

    fn enqueue_nd_range_kernel(
        &self,
        queue: RawHandle,
        kernel: RawHandle,
        range: &NdRange,
        wait: &[RawHandle],
    ) -> Result<RawHandle, ErrorCode> {
        // 数组只有 3 维，不能交给库去读更多
        if !(1..=3).contains(&range.work_dim) {
            return Err(ErrorCode::INVALID_WORK_DIMENSION);
        }
        let offset = range.offset.as_ref().map_or(null(), |o| o.as_ptr());
        let local = range.local.as_ref().map_or(null(), |l| l.as_ptr());
        enqueue(wait, |n, wait, event| unsafe {
            (self.api.clEnqueueNDRangeKernel)(
                raw(queue),
                raw(kernel),
                range.work_dim,
                offset,
                range.global.as_ptr(),
                local,
                n,
                wait,
                event,
            )
        })
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
        enqueue(wait, |n, wait, event| {
            (self.api.clEnqueueReadBuffer)(
                raw(queue),
                raw(buffer),
                blocking as _,
                offset,
                size,
                dst,
                n,
                wait,
                event,
            )
        })
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
        enqueue(wait, |n, wait, event| {
            (self.api.clEnqueueWriteBuffer)(
                raw(queue),
                raw(buffer),
                blocking as _,
                offset,
                size,
                src,
                n,
                wait,
                event,
            )
        })
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
        enqueue(wait, |n, wait, event| {
            (self.api.clEnqueueReadImage)(
                raw(queue),
                raw(image),
                blocking as _,
                origin.as_ptr(),
                region.as_ptr(),
                row_pitch,
                slice_pitch,
                dst,
                n,
                wait,
                event,
            )
        })
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
        enqueue(wait, |n, wait, event| {
            (self.api.clEnqueueWriteImage)(
                raw(queue),
                raw(image),
                blocking as _,
                origin.as_ptr(),
                region.as_ptr(),
                row_pitch,
                slice_pitch,
                src,
                n,
                wait,
                event,
            )
        })
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
        enqueue(wait, |n, wait, event| unsafe {
            (self.api.clEnqueueCopyBuffer)(
                raw(queue),
                raw(src),
                raw(dst),
                src_offset,
                dst_offset,
                size,
                n,
                wait,
                event,
            )
        })
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
        enqueue(wait, |n, wait, event| unsafe {
            (self.api.clEnqueueCopyImage)(
                raw(queue),
                raw(src),
                raw(dst),
                src_origin.as_ptr(),
                dst_origin.as_ptr(),
                region.as_ptr(),
                n,
                wait,
                event,
            )
        })
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
        enqueue(wait, |n, wait, event| unsafe {
            (self.api.clEnqueueCopyImageToBuffer)(
                raw(queue),
                raw(src),
                raw(dst),
                src_origin.as_ptr(),
                region.as_ptr(),
                dst_offset,
                n,
                wait,
                event,
            )
        })
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
        enqueue(wait, |n, wait, event| unsafe {
            (self.api.clEnqueueCopyBufferToImage)(
                raw(queue),
                raw(src),
                raw(dst),
                src_offset,
                dst_origin.as_ptr(),
                region.as_ptr(),
                n,
                wait,
                event,
            )
        })
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
        enqueue(wait, |n, wait, event| unsafe {
            (self.api.clEnqueueFillBuffer)(
                raw(queue),
                raw(buffer),
                pattern.as_ptr().cast(),
                pattern.len(),
                offset,
                size,
                n,
                wait,
                event,
            )
        })
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
        let color = color.to_bytes();
        enqueue(wait, |n, wait, event| unsafe {
            (self.api.clEnqueueFillImage)(
                raw(queue),
                raw(image),
                color.as_ptr().cast(),
                origin.as_ptr(),
                region.as_ptr(),
                n,
                wait,
                event,
            )
        })
    }

    fn enqueue_marker(&self, queue: RawHandle, wait: &[RawHandle]) -> Result<RawHandle, ErrorCode> {
        enqueue(wait, |n, wait, event| unsafe {
            (self.api.clEnqueueMarkerWithWaitList)(raw(queue), n, wait, event)
        })
    }

    fn enqueue_barrier(
        &self,
        queue: RawHandle,
        wait: &[RawHandle],
    ) -> Result<RawHandle, ErrorCode> {
        enqueue(wait, |n, wait, event| unsafe {
            (self.api.clEnqueueBarrierWithWaitList)(raw(queue), n, wait, event)
        })
    }

    fn flush(&self, queue: RawHandle) -> Result<(), ErrorCode> {
        check(unsafe { (self.api.clFlush)(raw(queue)) })
    }

    fn finish(&self, queue: RawHandle) -> Result<(), ErrorCode> {
        check(unsafe { (self.api.clFinish)(raw(queue)) })
    }

    fn wait_for_events(&self, events: &[RawHandle]) -> Result<(), ErrorCode> {
        let (n, events) = list(events);
        check(unsafe { (self.api.clWaitForEvents)(n, events) })
    }

    fn event_status(&self, event: RawHandle) -> Result<i32, ErrorCode> {
        let mut status = 0i32;
        check(unsafe {
            (self.api.clGetEventInfo)(
                raw(event),
                ffi::EVENT_COMMAND_EXECUTION_STATUS,
                size_of::<i32>(),
                (&mut status as *mut i32).cast(),
                null_mut(),
            )
        })?;
        Ok(status)
    }

    fn set_event_callback(
        &self,
        event: RawHandle,
        threshold: i32,
        callback: EventCallback,
    ) -> Result<(), ErrorCode> {
        let user = Box::into_raw(Box::new(callback)).cast::<c_void>();
        let result = check(unsafe { (self.api.clSetEventCallback)(raw(event), threshold, notify, user) });
        if result.is_err() {
            // 登记失败时回调不会被调用，收回所有权
            drop(unsafe { Box::from_raw(user.cast::<EventCallback>()) })
        }
        result
    }

    fn event_profiling(&self, event: RawHandle, param: ProfilingParam) -> Result<u64, ErrorCode> {
        let mut val = 0u64;
        check(unsafe {
            (self.api.clGetEventProfilingInfo)(
                raw(event),
                param as _,
                size_of::<u64>(),
                (&mut val as *mut u64).cast(),
                null_mut(),
            )
        })?;
        Ok(val)
    }

    fn release(&self, kind: ObjectKind, handle: RawHandle) -> Result<(), ErrorCode> {
        let f = match kind {
            ObjectKind::Context => self.api.clReleaseContext,
            ObjectKind::CommandQueue => self.api.clReleaseCommandQueue,
            ObjectKind::MemObject => self.api.clReleaseMemObject,
            ObjectKind::Sampler => self.api.clReleaseSampler,
            ObjectKind::Program => self.api.clReleaseProgram,
            ObjectKind::Kernel => self.api.clReleaseKernel,
            ObjectKind::Event => self.api.clReleaseEvent,
        };
        check(unsafe { f(raw(handle)) })
    }
}

#[test]
fn test_handles() {
    let handles = [RawHandle(0x10), RawHandle(0x20)];
    let (n, ptr) = list(&handles);
    assert_eq!(n, 2);
    assert_eq!(unsafe { *ptr.add(1) } as usize, 0x20);
    assert_eq!(list(&[]), (0, null()));
    assert_eq!(handle(raw(RawHandle(0x30))), RawHandle(0x30));

    let mut out = [0u8; 4];
    let len = query(Some(&mut out), |len, ptr, ret| unsafe {
        assert_eq!(len, 4);
        ptr.cast::<u8>().write(7);
        *ret = 1;
        0
    })
    .unwrap();
    assert_eq!((len, out[0]), (1, 7));
    assert_eq!(
        query(None, |_, _, _| ErrorCode::INVALID_VALUE.0),
        Err(ErrorCode::INVALID_VALUE)
    );
}
