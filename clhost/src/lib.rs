//! 异构计算运行时的宿主端抽象。
//!
//! 平台、设备、上下文、命令队列、存储对象、核函数和事件都是原生运行时对象的句柄，
//! 由 [`Runtime`] 特质约定的原生接口驱动。

mod context;
mod device;
mod error;
mod event;
mod format;
mod handle;
mod info;
mod kernel;
mod memory;
mod platform;
mod program;
mod queue;
mod runtime;
mod sampler;
mod types;

pub mod config;

#[cfg(any(use_cpu, test))]
pub mod cpu;

#[cfg(use_cl)]
pub mod opencl;

#[cfg(test)]
mod test_utils;

pub use config::{Backend, Config};
pub use context::Context;
pub use device::{Device, DeviceDescriptor};
pub use error::{Error, ErrorCode, ErrorKind};
pub use event::{wait_for_all, Event, Profile, UserEvent};
pub use format::{host_pitches, host_size, ChannelOrder, ChannelType, ImageDesc, ImageFormat};
pub use handle::{ObjectKind, RawHandle};
pub use kernel::Kernel;
pub use memory::{Buffer, Image, MemObject};
pub use platform::Platform;
pub use program::Program;
pub use queue::CommandQueue;
pub use runtime::{EventCallback, FillColor, NdRange, Runtime};
pub use sampler::Sampler;
pub use types::{
    AddressingMode, CommandType, DeviceParam, DeviceType, ExecStatus, FilterMode, KernelParam,
    MemFlags, MemObjectType, PlatformParam, ProfilingParam, QueueProperties,
};

use log::info;
use std::sync::Arc;

/// 按配置选择原生运行时。
pub fn runtime(config: &Config) -> Result<Arc<dyn Runtime>, Error> {
    match config.backend {
        Backend::Cpu => cpu_runtime(config),
        Backend::OpenCl => cl_runtime(),
        Backend::Auto => cl_runtime().or_else(|e| {
            info!("OpenCL unavailable ({e}), use simulated device");
            cpu_runtime(config)
        }),
    }
}

#[cfg(any(use_cpu, test))]
fn cpu_runtime(config: &Config) -> Result<Arc<dyn Runtime>, Error> {
    Ok(Arc::new(cpu::CpuRuntime::new(&config.cpu)?))
}

#[cfg(not(any(use_cpu, test)))]
fn cpu_runtime(_: &Config) -> Result<Arc<dyn Runtime>, Error> {
    Err(error::functions::precondition(
        "built without feature common-cpu",
    ))
}

#[cfg(use_cl)]
fn cl_runtime() -> Result<Arc<dyn Runtime>, Error> {
    Ok(Arc::new(opencl::ClRuntime::load()?))
}

#[cfg(not(use_cl))]
fn cl_runtime() -> Result<Arc<dyn Runtime>, Error> {
    Err(error::functions::precondition(
        "built without feature opencl",
    ))
}

#[test]
fn test_select() {
    let rt = runtime(&Config::default()).unwrap();
    assert_eq!(rt.name(), cpu::CpuRuntime::NAME);

    let config = Config {
        backend: Backend::Auto,
        ..Default::default()
    };
    assert!(runtime(&config).is_ok());
}
