use crate::{
    error::functions::status,
    info::{query_array, query_scalar, query_string},
    DeviceParam, DeviceType, Error, ErrorCode, Platform, RawHandle, Runtime,
};
use bytemuck::Pod;
use std::{fmt, sync::Arc};

/// 设备发现时取得的属性快照，之后不再改变。
#[derive(Clone, Debug)]
pub struct DeviceDescriptor {
    pub name: String,
    pub vendor: String,
    pub version: String,
    pub driver_version: String,
    pub profile: String,
    pub ty: DeviceType,
    pub address_bits: u32,
    pub available: bool,

    pub global_mem_size: u64,
    pub global_mem_cache_size: u64,
    pub local_mem_size: u64,
    pub max_constant_buffer_size: u64,
    pub max_mem_alloc_size: u64,

    pub max_compute_units: u32,
    pub max_clock_frequency: u32,
    pub max_work_group_size: usize,
    pub max_work_item_sizes: Vec<usize>,

    pub image_support: bool,
    pub image2d_max: [usize; 2],
    pub image3d_max: [usize; 3],
    pub image_max_array_size: usize,

    /// char, short, int, long, float, double, half
    pub preferred_vector_widths: [u32; 7],
    pub extensions: Vec<String>,
}

/// 计算设备。设备不需要释放，描述符在克隆之间共享。
#[derive(Clone)]
pub struct Device {
    raw: RawHandle,
    platform: Platform,
    desc: Arc<DeviceDescriptor>,
}

impl Device {
    pub(crate) fn discover(platform: &Platform, raw: RawHandle) -> Result<Self, Error> {
        let runtime = &**platform.runtime();
        let string = |param| {
            query_string(|out| runtime.device_info(raw, param, out)).map_err(|code| err(code, param))
        };
        let u32_ = |param| scalar::<u32>(runtime, raw, param);
        let u64_ = |param| scalar::<u64>(runtime, raw, param);
        let usize_ = |param| scalar::<usize>(runtime, raw, param);
        use DeviceParam as P;

        let desc = DeviceDescriptor {
            name: string(P::Name)?,
            vendor: string(P::Vendor)?,
            version: string(P::Version)?,
            driver_version: string(P::DriverVersion)?,
            profile: string(P::Profile)?,
            ty: DeviceType::from_bits_retain(u64_(P::Type)?),
            address_bits: u32_(P::AddressBits)?,
            available: u32_(P::Available)? != 0,

            global_mem_size: u64_(P::GlobalMemSize)?,
            global_mem_cache_size: u64_(P::GlobalMemCacheSize)?,
            local_mem_size: u64_(P::LocalMemSize)?,
            max_constant_buffer_size: u64_(P::MaxConstantBufferSize)?,
            max_mem_alloc_size: u64_(P::MaxMemAllocSize)?,

            max_compute_units: u32_(P::MaxComputeUnits)?,
            max_clock_frequency: u32_(P::MaxClockFrequency)?,
            max_work_group_size: usize_(P::MaxWorkGroupSize)?,
            max_work_item_sizes: query_array(|out| runtime.device_info(raw, P::MaxWorkItemSizes, out))
                .map_err(|code| err(code, P::MaxWorkItemSizes))?,

            image_support: u32_(P::ImageSupport)? != 0,
            image2d_max: [usize_(P::Image2dMaxWidth)?, usize_(P::Image2dMaxHeight)?],
            image3d_max: [
                usize_(P::Image3dMaxWidth)?,
                usize_(P::Image3dMaxHeight)?,
                usize_(P::Image3dMaxDepth)?,
            ],
            image_max_array_size: usize_(P::ImageMaxArraySize)?,

            preferred_vector_widths: [
                u32_(P::PreferredVectorWidthChar)?,
                u32_(P::PreferredVectorWidthShort)?,
                u32_(P::PreferredVectorWidthInt)?,
                u32_(P::PreferredVectorWidthLong)?,
                u32_(P::PreferredVectorWidthFloat)?,
                u32_(P::PreferredVectorWidthDouble)?,
                u32_(P::PreferredVectorWidthHalf)?,
            ],
            extensions: string(P::Extensions)?
                .split_whitespace()
                .map(String::from)
                .collect(),
        };
        Ok(Self {
            raw,
            platform: platform.clone(),
            desc: Arc::new(desc),
        })
    }

    #[inline]
    pub fn raw(&self) -> RawHandle {
        self.raw
    }

    #[inline]
    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    #[inline]
    pub fn runtime(&self) -> &Arc<dyn Runtime> {
        self.platform.runtime()
    }

    #[inline]
    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.desc
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.desc.name
    }

    #[inline]
    pub fn ty(&self) -> DeviceType {
        self.desc.ty
    }

    pub fn has_extension(&self, name: &str) -> bool {
        self.desc.extensions.iter().any(|it| it == name)
    }
}

fn scalar<T: Pod>(runtime: &dyn Runtime, raw: RawHandle, param: DeviceParam) -> Result<T, Error> {
    query_scalar(|out| runtime.device_info(raw, param, out)).map_err(|code| err(code, param))
}

#[inline]
fn err(code: ErrorCode, param: DeviceParam) -> Error {
    status(code, format!("device info {param:?}"))
}

impl PartialEq for Device {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for Device {}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Device({:?} {})", self.raw, self.desc.name)
    }
}

#[cfg(test)]
mod test {
    use crate::{test_utils::runtime, DeviceType, Platform};

    #[test]
    fn test_descriptor() {
        let runtime = runtime();
        let platform = Platform::all(&runtime).unwrap().remove(0);
        let device = platform.devices(DeviceType::CPU).unwrap().remove(0);
        let desc = device.descriptor();

        assert_eq!(device.ty(), DeviceType::CPU);
        assert_eq!(desc.name, "test cpu");
        assert_eq!(desc.address_bits, usize::BITS);
        assert_eq!(desc.max_work_item_sizes.len(), 3);
        assert_eq!(desc.max_work_group_size, 256);
        assert_eq!(desc.local_mem_size, 16 << 10);
        assert!(desc.image_support);
        assert!(desc.available);
        assert!(desc.max_mem_alloc_size <= desc.global_mem_size);
        assert!(device.has_extension("cl_khr_fp16"));
    }
}
