use crate::{
    error::{functions::status, LastError},
    handle::Owned,
    info::{query_scalar, query_string},
    Context, Error, ErrorCode, KernelParam, MemObject, ObjectKind, RawHandle, Sampler,
};
use bytemuck::Pod;
use std::{
    ffi::c_void,
    fmt,
    mem::size_of,
    ptr::{from_ref, null},
};

/// 核函数实例。参数槽只写，在入队时被捕获。
pub struct Kernel<'ctx> {
    ctx: &'ctx Context,
    handle: Owned,
    name: String,
    num_args: u32,
    last_error: LastError,
}

impl<'ctx> Kernel<'ctx> {
    pub(crate) fn create(ctx: &'ctx Context, program: RawHandle, name: &str) -> Result<Self, Error> {
        let runtime = ctx.runtime();
        let raw = ctx.record(
            &format!("create kernel {name}"),
            runtime.create_kernel(program, name),
        )?;
        let handle = Owned::new(runtime.clone(), ObjectKind::Kernel, raw);
        let name = query_string(|out| runtime.kernel_info(raw, KernelParam::FunctionName, out))
            .map_err(|code| status(code, "kernel name"))?;
        let num_args = query_scalar(|out| runtime.kernel_info(raw, KernelParam::NumArgs, out))
            .map_err(|code| status(code, "kernel args"))?;
        Ok(Self {
            ctx,
            handle,
            name,
            num_args,
            last_error: LastError::default(),
        })
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
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn num_args(&self) -> u32 {
        self.num_args
    }

    #[inline]
    pub fn last_error(&self) -> ErrorCode {
        self.last_error.get()
    }

    unsafe fn bind(&self, index: u32, size: usize, value: *const c_void) -> Result<&Self, Error> {
        let result = self
            .ctx
            .runtime()
            .set_kernel_arg(self.raw(), index, size, value);
        self.last_error
            .record(&format!("{} arg {index}", self.name), result)
            .map(|()| self)
    }

    /// 以值绑定参数。
    pub fn set_arg<T: Pod>(&self, index: u32, value: &T) -> Result<&Self, Error> {
        unsafe { self.bind(index, size_of::<T>(), from_ref(value).cast()) }
    }

    /// 绑定缓冲或图像。
    pub fn set_mem_arg(&self, index: u32, mem: &impl MemObject) -> Result<&Self, Error> {
        let raw = mem.raw();
        unsafe { self.bind(index, size_of::<RawHandle>(), from_ref(&raw).cast()) }
    }

    pub fn set_sampler_arg(&self, index: u32, sampler: &Sampler) -> Result<&Self, Error> {
        let raw = sampler.raw();
        unsafe { self.bind(index, size_of::<RawHandle>(), from_ref(&raw).cast()) }
    }

    /// 为局部存储参数声明 `size` 字节，每个工作组独立分配。
    pub fn set_local_arg(&self, index: u32, size: usize) -> Result<&Self, Error> {
        unsafe { self.bind(index, size, null()) }
    }

    pub fn release(&self) -> Result<(), Error> {
        let result = self.handle.release();
        self.last_error.record("release kernel", result)
    }
}

impl fmt::Debug for Kernel<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Kernel({:?} {})", self.raw(), self.name)
    }
}

#[cfg(test)]
mod test {
    use crate::{
        test_utils::{context, SCALE},
        AddressingMode, ErrorCode, FilterMode, MemFlags, NdRange, QueueProperties,
    };
    use std::mem::size_of;

    #[test]
    fn test_arg_validation() {
        let ctx = context();
        let kernel = ctx.create_kernel(SCALE, "scale", "").unwrap();
        assert_eq!(kernel.name(), "scale");
        assert_eq!(kernel.num_args(), 3);

        let buf = ctx.create_buffer::<f32>(8, MemFlags::READ_WRITE).unwrap();
        let e = kernel.set_arg(3, &1.0f32).unwrap_err();
        assert_eq!(e.code(), Some(ErrorCode::INVALID_ARG_INDEX));
        assert_eq!(kernel.last_error(), ErrorCode::INVALID_ARG_INDEX);

        let e = kernel.set_arg(1, &1.0f64).unwrap_err();
        assert_eq!(e.code(), Some(ErrorCode::INVALID_ARG_SIZE));

        let e = kernel.set_arg(0, &1u8).unwrap_err();
        assert_eq!(e.code(), Some(ErrorCode::INVALID_ARG_SIZE));

        let e = kernel.set_arg(2, &0u32).unwrap_err();
        assert_eq!(e.code(), Some(ErrorCode::INVALID_ARG_VALUE));

        let sampler = ctx
            .create_sampler(false, AddressingMode::ClampToEdge, FilterMode::Nearest)
            .unwrap();
        let e = kernel.set_sampler_arg(0, &sampler).unwrap_err();
        assert_eq!(e.code(), Some(ErrorCode::INVALID_MEM_OBJECT));

        kernel.set_mem_arg(0, &buf).unwrap();
        assert_eq!(kernel.last_error(), ErrorCode::SUCCESS);
        let e = kernel.set_local_arg(2, 0).unwrap_err();
        assert_eq!(e.code(), Some(ErrorCode::INVALID_ARG_SIZE));
        kernel.set_local_arg(2, 64).unwrap();
    }

    #[test]
    fn test_local_memory() {
        let ctx = context();
        let queue = ctx
            .create_queue(&ctx.devices()[0], QueueProperties::empty())
            .unwrap();
        let data = (1..=64).map(|i| i as f32).collect::<Vec<_>>();
        let buf = ctx.create_buffer_from(&data, MemFlags::READ_WRITE).unwrap();
        let kernel = ctx.create_kernel(SCALE, "scale", "").unwrap();
        kernel
            .set_mem_arg(0, &buf)
            .unwrap()
            .set_arg(1, &0.5f32)
            .unwrap()
            .set_local_arg(2, 16 * size_of::<f32>())
            .unwrap();
        queue
            .enqueue_kernel(&kernel, &NdRange::new(&[64]).local(&[16]), &[])
            .unwrap();

        let mut out = [0f32; 64];
        queue.read_buffer(&buf, 0, &mut out, &[]).unwrap();
        assert!(out.iter().zip(&data).all(|(&a, &b)| a == b * 0.5));
    }
}
