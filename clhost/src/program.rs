use crate::{
    error::{functions::status, LastError},
    handle::Owned,
    info::query_string,
    Context, Device, Error, ErrorCode, Kernel, ObjectKind, RawHandle,
};
use log::warn;
use std::fmt;

/// 从源码编译的程序。
pub struct Program<'ctx> {
    ctx: &'ctx Context,
    handle: Owned,
    last_error: LastError,
}

impl<'ctx> Program<'ctx> {
    pub(crate) fn new(ctx: &'ctx Context, raw: RawHandle) -> Self {
        Self {
            ctx,
            handle: Owned::new(ctx.runtime().clone(), ObjectKind::Program, raw),
            last_error: LastError::default(),
        }
    }

    /// 为上下文的所有设备编译，编译失败时错误信息是各设备的编译日志。
    pub(crate) fn build(&self, options: &str) -> Result<(), Error> {
        let devices = self.ctx.devices().iter().map(Device::raw).collect::<Vec<_>>();
        let result = self
            .ctx
            .runtime()
            .build_program(self.raw(), &devices, options);
        match result {
            Ok(()) => {
                for device in self.ctx.devices() {
                    let log = self.build_log(device)?;
                    if !log.trim().is_empty() {
                        warn!("{log}")
                    }
                }
                self.last_error.set(ErrorCode::SUCCESS);
                Ok(())
            }
            Err(code) => {
                let mut logs = String::new();
                for device in self.ctx.devices() {
                    if let Ok(log) = self.build_log(device) {
                        logs.push_str(&log)
                    }
                }
                self.last_error.fail(status(code, logs))
            }
        }
    }

    #[inline]
    pub(crate) fn into_owned(self) -> Owned {
        self.handle
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
    pub fn last_error(&self) -> ErrorCode {
        self.last_error.get()
    }

    pub fn kernel(&self, name: &str) -> Result<Kernel<'ctx>, Error> {
        Kernel::create(self.ctx, self.raw(), name)
    }

    /// 程序中全部核函数的名字。
    pub fn kernel_names(&self) -> Result<Vec<String>, Error> {
        let result = query_string(|out| self.ctx.runtime().program_kernel_names(self.raw(), out));
        self.last_error
            .record("program kernel names", result)
            .map(|names| {
                names
                    .split(';')
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
    }

    /// 为每个核函数创建一个实例。
    pub fn kernels(&self) -> Result<Vec<Kernel<'ctx>>, Error> {
        self.kernel_names()?
            .iter()
            .map(|name| self.kernel(name))
            .collect()
    }

    pub fn build_log(&self, device: &Device) -> Result<String, Error> {
        let result = query_string(|out| {
            self.ctx
                .runtime()
                .program_build_log(self.raw(), device.raw(), out)
        });
        self.last_error.record("program build log", result)
    }

    pub fn release(&self) -> Result<(), Error> {
        let result = self.handle.release();
        self.last_error.record("release program", result)
    }
}

impl fmt::Debug for Program<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Program({:?})", self.raw())
    }
}

#[cfg(test)]
mod test {
    use crate::{
        test_utils::{context, SCALE, VECTOR_ADD},
        ErrorCode,
    };

    #[test]
    fn test_kernels() {
        let ctx = context();
        let source = format!("{VECTOR_ADD}\n{SCALE}");
        let program = ctx.build_program(&source, "-cl-fast-relaxed-math").unwrap();
        assert_eq!(program.kernel_names().unwrap(), ["vector_add", "scale"]);
        let kernels = program.kernels().unwrap();
        assert_eq!(kernels.len(), 2);
        assert_eq!(kernels[1].name(), "scale");

        // 程序释放后已经创建的核函数仍然可用
        program.release().unwrap();
        assert_eq!(kernels[0].num_args(), 4);
        assert_eq!(
            program.kernel("scale").unwrap_err().code(),
            Some(ErrorCode::INVALID_PROGRAM)
        );
    }

    #[test]
    fn test_build_failure() {
        let ctx = context();
        let source = "__kernel void unknown(__global int* x) { x[0] = 1; }";
        let e = ctx.build_program(source, "").unwrap_err();
        assert_eq!(e.code(), Some(ErrorCode::BUILD_PROGRAM_FAILURE));
        assert!(e.info.contains("unknown"));
        assert_eq!(ctx.last_error(), ErrorCode::BUILD_PROGRAM_FAILURE);

        let e = ctx.create_kernel("void helper() {}", "helper", "").unwrap_err();
        assert_eq!(e.code(), Some(ErrorCode::INVALID_KERNEL_NAME));
    }
}
