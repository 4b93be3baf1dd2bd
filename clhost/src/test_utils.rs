use crate::{
    config::{CpuConfig, CpuDevice, CpuPlatform},
    cpu::CpuRuntime,
    Context, DeviceType, Platform, Runtime,
};
use std::sync::Arc;

pub const VECTOR_ADD: &str = r#"
__kernel void vector_add(__global const float* a,
                         __global const float* b,
                         __global float* c,
                         uint n) {
    size_t i = get_global_id(0);
    if (i < n) c[i] = a[i] + b[i];
}
"#;

pub const SCALE: &str = r#"
__kernel void scale(__global float* data, float factor, __local float* scratch) {
    size_t l = get_local_id(0);
    scratch[l] = data[get_global_id(0)] * factor;
    barrier(CLK_LOCAL_MEM_FENCE);
    data[get_global_id(0)] = scratch[l];
}
"#;

/// 两个平台：0 号只有一个 CPU 设备，1 号只有一个 GPU 设备。
pub fn test_config() -> CpuConfig {
    let device = |name: &str, ty| CpuDevice {
        name: name.into(),
        ty,
        compute_units: 4,
        clock_mhz: 1000,
        global_mem_size: 64 << 20,
        local_mem_size: 16 << 10,
        max_work_group_size: 256,
        image_support: true,
        available: true,
    };
    let platform = |i: usize, device| CpuPlatform {
        name: format!("test platform {i}"),
        vendor: "clhost".into(),
        version: "OpenCL 1.2 test".into(),
        devices: vec![device],
    };
    CpuConfig {
        platforms: vec![
            platform(0, device("test cpu", DeviceType::CPU)),
            platform(1, device("test gpu", DeviceType::GPU)),
        ],
        workers: 4,
    }
}

/// 注册了测试核函数的模拟运行时。
pub fn runtime() -> Arc<dyn Runtime> {
    let _ = env_logger::builder().is_test(true).try_init();
    let rt = CpuRuntime::new(&test_config()).unwrap();
    unsafe {
        rt.register_kernel("vector_add", |group, args| {
            let a = args.global::<f32>(0);
            let b = args.global::<f32>(1);
            let c = args.global::<f32>(2);
            let n = args.scalar::<u32>(3) as usize;
            for item in group.items() {
                let i = item.global_id(0);
                if i < n {
                    c.set(i, a.get(i) + b.get(i))
                }
            }
        });
        rt.register_kernel("scale", |group, args| {
            let data = args.global::<f32>(0);
            let factor = args.scalar::<f32>(1);
            let scratch = args.local::<f32>(2);
            for item in group.items() {
                scratch.set(item.local_id(0), data.get(item.global_id(0)) * factor)
            }
            for item in group.items() {
                data.set(item.global_id(0), scratch.get(item.local_id(0)))
            }
        });
    }
    Arc::new(rt)
}

/// 0 号平台的 CPU 设备上的上下文。
pub fn context() -> Context {
    let runtime = runtime();
    let platform = Platform::all(&runtime).unwrap().remove(0);
    Context::new(&platform.devices(DeviceType::CPU).unwrap()).unwrap()
}

/// 上下文背后的模拟运行时。
pub fn cpu(ctx: &Context) -> &CpuRuntime {
    assert_eq!(ctx.runtime().name(), CpuRuntime::NAME);
    unsafe { &*(Arc::as_ptr(ctx.runtime()) as *const CpuRuntime) }
}
