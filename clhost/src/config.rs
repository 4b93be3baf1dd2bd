use crate::{error::functions::precondition, DeviceType, Error};
use std::{env, str::FromStr};

/// 原生运行时的来源。
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Backend {
    /// 进程内模拟设备。
    Cpu,
    /// 系统安装的 OpenCL 库。
    OpenCl,
    /// 优先 OpenCL，加载失败时退回模拟设备。
    Auto,
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "opencl" | "cl" => Ok(Self::OpenCl),
            "auto" => Ok(Self::Auto),
            _ => Err(precondition(format!("unknown backend \"{s}\""))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub backend: Backend,
    /// 上下文中按源码和编译选项缓存的程序数。
    pub program_cache: usize,
    pub cpu: CpuConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: Backend::Cpu,
            program_cache: 16,
            cpu: CpuConfig::default(),
        }
    }
}

impl Config {
    pub const ENV_BACKEND: &'static str = "CLHOST_BACKEND";
    pub const ENV_WORKERS: &'static str = "CLHOST_WORKERS";
    pub const ENV_PROGRAM_CACHE: &'static str = "CLHOST_PROGRAM_CACHE";

    /// 从环境变量覆盖默认配置，未设置的项保持默认值。
    pub fn from_env() -> Result<Self, Error> {
        let mut ans = Self::default();
        if let Some(val) = var(Self::ENV_BACKEND) {
            ans.backend = val.parse()?
        }
        if let Some(val) = var(Self::ENV_WORKERS) {
            ans.cpu.workers = parse_usize(Self::ENV_WORKERS, &val)?
        }
        if let Some(val) = var(Self::ENV_PROGRAM_CACHE) {
            ans.program_cache = parse_usize(Self::ENV_PROGRAM_CACHE, &val)?
        }
        Ok(ans)
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn parse_usize(key: &str, val: &str) -> Result<usize, Error> {
    val.trim()
        .parse()
        .map_err(|_| precondition(format!("{key}={val} is not a number")))
}

/// 模拟设备的配置。
#[derive(Clone, Debug)]
pub struct CpuConfig {
    pub platforms: Vec<CpuPlatform>,
    /// 执行器线程数，0 表示由线程池决定。
    pub workers: usize,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            platforms: vec![CpuPlatform::default()],
            workers: 0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CpuPlatform {
    pub name: String,
    pub vendor: String,
    pub version: String,
    pub devices: Vec<CpuDevice>,
}

impl Default for CpuPlatform {
    fn default() -> Self {
        Self {
            name: "clhost simulated platform".into(),
            vendor: "clhost".into(),
            version: "OpenCL 1.2 clhost".into(),
            devices: vec![CpuDevice::default()],
        }
    }
}

#[derive(Clone, Debug)]
pub struct CpuDevice {
    pub name: String,
    pub ty: DeviceType,
    pub compute_units: u32,
    pub clock_mhz: u32,
    pub global_mem_size: u64,
    pub local_mem_size: u64,
    pub max_work_group_size: usize,
    pub image_support: bool,
    pub available: bool,
}

impl Default for CpuDevice {
    fn default() -> Self {
        Self {
            name: "clhost cpu".into(),
            ty: DeviceType::CPU,
            compute_units: std::thread::available_parallelism().map_or(1, |n| n.get() as _),
            clock_mhz: 1000,
            global_mem_size: 1 << 30,
            local_mem_size: 32 << 10,
            max_work_group_size: 1024,
            image_support: true,
            available: true,
        }
    }
}

#[test]
fn test_backend() {
    assert_eq!("CPU".parse::<Backend>().unwrap(), Backend::Cpu);
    assert_eq!(" opencl ".parse::<Backend>().unwrap(), Backend::OpenCl);
    assert!("cuda".parse::<Backend>().unwrap_err().is_precondition());
    assert!(parse_usize("X", "8").is_ok_and(|n| n == 8));
    assert!(parse_usize("X", "eight").is_err());
}
