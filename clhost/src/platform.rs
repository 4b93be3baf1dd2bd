use crate::{
    error::functions::status,
    info::{query_string, query_with},
    Device, DeviceType, Error, ErrorCode, PlatformParam, RawHandle, Runtime,
};
use std::{fmt, sync::Arc};

/// 运行时提供的平台。平台不需要释放。
#[derive(Clone)]
pub struct Platform {
    runtime: Arc<dyn Runtime>,
    raw: RawHandle,
}

impl Platform {
    /// 按发现顺序列出所有平台。
    pub fn all(runtime: &Arc<dyn Runtime>) -> Result<Vec<Self>, Error> {
        let ids = query_with(RawHandle::NULL, |out| runtime.platform_ids(out))
            .map_err(|code| status(code, "platform ids"))?;
        Ok(ids
            .into_iter()
            .map(|raw| Self {
                runtime: runtime.clone(),
                raw,
            })
            .collect())
    }

    #[inline]
    pub fn raw(&self) -> RawHandle {
        self.raw
    }

    #[inline]
    pub fn runtime(&self) -> &Arc<dyn Runtime> {
        &self.runtime
    }

    fn info(&self, param: PlatformParam) -> Result<String, Error> {
        query_string(|out| self.runtime.platform_info(self.raw, param, out))
            .map_err(|code| status(code, format!("platform info {param:?}")))
    }

    #[inline]
    pub fn name(&self) -> Result<String, Error> {
        self.info(PlatformParam::Name)
    }

    #[inline]
    pub fn vendor(&self) -> Result<String, Error> {
        self.info(PlatformParam::Vendor)
    }

    #[inline]
    pub fn version(&self) -> Result<String, Error> {
        self.info(PlatformParam::Version)
    }

    #[inline]
    pub fn profile(&self) -> Result<String, Error> {
        self.info(PlatformParam::Profile)
    }

    pub fn extensions(&self) -> Result<Vec<String>, Error> {
        self.info(PlatformParam::Extensions)
            .map(|s| s.split_whitespace().map(String::from).collect())
    }

    /// 平台上满足类型过滤的设备，没有时返回空表。
    pub fn devices(&self, ty: DeviceType) -> Result<Vec<Device>, Error> {
        let ids = match query_with(RawHandle::NULL, |out| {
            self.runtime.device_ids(self.raw, ty, out)
        }) {
            Ok(ids) => ids,
            Err(ErrorCode::DEVICE_NOT_FOUND) => return Ok(vec![]),
            Err(code) => return Err(status(code, "device ids")),
        };
        ids.into_iter()
            .map(|raw| Device::discover(self, raw))
            .collect()
    }
}

impl fmt::Debug for Platform {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Platform({:?})", self.raw)
    }
}

#[cfg(test)]
mod test {
    use crate::{test_utils::runtime, DeviceType, Platform};

    #[test]
    fn test_discover() {
        let runtime = runtime();
        let platforms = Platform::all(&runtime).unwrap();
        assert_eq!(platforms.len(), 2);

        let first = &platforms[0];
        assert_eq!(first.name().unwrap(), "test platform 0");
        assert!(first.version().unwrap().starts_with("OpenCL"));
        assert_eq!(first.profile().unwrap(), "FULL_PROFILE");

        assert_eq!(first.devices(DeviceType::ALL).unwrap().len(), 1);
        assert!(first.devices(DeviceType::GPU).unwrap().is_empty());
        let gpus = platforms[1].devices(DeviceType::GPU).unwrap();
        assert_eq!(gpus.len(), 1);
        assert_eq!(gpus[0].platform().raw(), platforms[1].raw());
    }
}
