#![allow(non_snake_case)]

use libloading::Library;
use std::ffi::{c_char, c_void};

/// 所有对象句柄在 C 接口上都是不透明指针。
pub(super) type H = *mut c_void;

pub(super) type EventNotify = unsafe extern "C" fn(H, i32, *mut c_void);

#[repr(C)]
pub(super) struct ImageFormat {
    pub order: u32,
    pub data_type: u32,
}

#[repr(C)]
pub(super) struct ImageDesc {
    pub image_type: u32,
    pub width: usize,
    pub height: usize,
    pub depth: usize,
    pub array_size: usize,
    pub row_pitch: usize,
    pub slice_pitch: usize,
    pub num_mip_levels: u32,
    pub num_samples: u32,
    pub buffer: H,
}

pub(super) const PROGRAM_KERNEL_NAMES: u32 = 0x1168;
pub(super) const PROGRAM_BUILD_LOG: u32 = 0x1183;
pub(super) const EVENT_COMMAND_EXECUTION_STATUS: u32 = 0x11D3;

macro_rules! api {
    ($( $name:ident( $($arg:ty),* ) -> $ret:ty; )+) => {
        /// 从动态库中解析出的入口。
        pub(super) struct Api {
            $( pub $name: unsafe extern "C" fn($($arg),*) -> $ret, )+
        }

        impl Api {
            /// # Safety
            ///
            /// `lib` 必须是 OpenCL 1.2 兼容的库，且比返回值活得久。
            pub unsafe fn load(lib: &Library) -> Result<Self, libloading::Error> {
                Ok(Self {
                    $( $name: *lib.get::<unsafe extern "C" fn($($arg),*) -> $ret>(
                        concat!(stringify!($name), "\0").as_bytes()
                    )?, )+
                })
            }
        }
    };
}

api! {
    clGetPlatformIDs(u32, *mut H, *mut u32) -> i32;
    clGetPlatformInfo(H, u32, usize, *mut c_void, *mut usize) -> i32;
    clGetDeviceIDs(H, u64, u32, *mut H, *mut u32) -> i32;
    clGetDeviceInfo(H, u32, usize, *mut c_void, *mut usize) -> i32;

    clCreateContext(*const isize, u32, *const H, *const c_void, *mut c_void, *mut i32) -> H;
    clGetSupportedImageFormats(H, u64, u32, u32, *mut ImageFormat, *mut u32) -> i32;
    clCreateCommandQueue(H, H, u64, *mut i32) -> H;

    clCreateBuffer(H, u64, usize, *mut c_void, *mut i32) -> H;
    clCreateImage(H, u64, *const ImageFormat, *const ImageDesc, *mut c_void, *mut i32) -> H;
    clCreateSampler(H, u32, u32, u32, *mut i32) -> H;
    clCreateUserEvent(H, *mut i32) -> H;
    clSetUserEventStatus(H, i32) -> i32;

    clCreateProgramWithSource(H, u32, *const *const c_char, *const usize, *mut i32) -> H;
    clBuildProgram(H, u32, *const H, *const c_char, *const c_void, *mut c_void) -> i32;
    clGetProgramInfo(H, u32, usize, *mut c_void, *mut usize) -> i32;
    clGetProgramBuildInfo(H, H, u32, usize, *mut c_void, *mut usize) -> i32;
    clCreateKernel(H, *const c_char, *mut i32) -> H;
    clGetKernelInfo(H, u32, usize, *mut c_void, *mut usize) -> i32;
    clSetKernelArg(H, u32, usize, *const c_void) -> i32;

    clEnqueueNDRangeKernel(H, H, u32, *const usize, *const usize, *const usize, u32, *const H, *mut H) -> i32;
    clEnqueueReadBuffer(H, H, u32, usize, usize, *mut c_void, u32, *const H, *mut H) -> i32;
    clEnqueueWriteBuffer(H, H, u32, usize, usize, *const c_void, u32, *const H, *mut H) -> i32;
    clEnqueueReadImage(H, H, u32, *const usize, *const usize, usize, usize, *mut c_void, u32, *const H, *mut H) -> i32;
    clEnqueueWriteImage(H, H, u32, *const usize, *const usize, usize, usize, *const c_void, u32, *const H, *mut H) -> i32;
    clEnqueueCopyBuffer(H, H, H, usize, usize, usize, u32, *const H, *mut H) -> i32;
    clEnqueueCopyImage(H, H, H, *const usize, *const usize, *const usize, u32, *const H, *mut H) -> i32;
    clEnqueueCopyImageToBuffer(H, H, H, *const usize, *const usize, usize, u32, *const H, *mut H) -> i32;
    clEnqueueCopyBufferToImage(H, H, H, usize, *const usize, *const usize, u32, *const H, *mut H) -> i32;
    clEnqueueFillBuffer(H, H, *const c_void, usize, usize, usize, u32, *const H, *mut H) -> i32;
    clEnqueueFillImage(H, H, *const c_void, *const usize, *const usize, u32, *const H, *mut H) -> i32;
    clEnqueueMarkerWithWaitList(H, u32, *const H, *mut H) -> i32;
    clEnqueueBarrierWithWaitList(H, u32, *const H, *mut H) -> i32;
    clFlush(H) -> i32;
    clFinish(H) -> i32;

    clWaitForEvents(u32, *const H) -> i32;
    clGetEventInfo(H, u32, usize, *mut c_void, *mut usize) -> i32;
    clSetEventCallback(H, i32, EventNotify, *mut c_void) -> i32;
    clGetEventProfilingInfo(H, u32, usize, *mut c_void, *mut usize) -> i32;

    clReleaseContext(H) -> i32;
    clReleaseCommandQueue(H) -> i32;
    clReleaseMemObject(H) -> i32;
    clReleaseSampler(H) -> i32;
    clReleaseProgram(H) -> i32;
    clReleaseKernel(H) -> i32;
    clReleaseEvent(H) -> i32;
}
