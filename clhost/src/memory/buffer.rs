use super::MemObject;
use crate::{
    error::LastError, handle::Owned, Context, Error, ErrorCode, MemFlags, MemObjectType,
    ObjectKind, RawHandle,
};
use std::{fmt, marker::PhantomData, mem::size_of};

/// 线性存储的 `T` 数组。
pub struct Buffer<'ctx, T> {
    ctx: &'ctx Context,
    handle: Owned,
    flags: MemFlags,
    len: usize,
    last_error: LastError,
    _phantom: PhantomData<T>,
}

impl<'ctx, T> Buffer<'ctx, T> {
    pub(crate) fn new(ctx: &'ctx Context, raw: RawHandle, flags: MemFlags, len: usize) -> Self {
        Self {
            ctx,
            handle: Owned::new(ctx.runtime().clone(), ObjectKind::MemObject, raw),
            flags,
            len,
            last_error: LastError::default(),
            _phantom: PhantomData,
        }
    }

    /// 元素数。
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 元素字节数。
    #[inline]
    pub const fn item_size(&self) -> usize {
        size_of::<T>()
    }
}

impl<T> MemObject for Buffer<'_, T> {
    #[inline]
    fn raw(&self) -> RawHandle {
        self.handle.raw()
    }
    #[inline]
    fn context(&self) -> &Context {
        self.ctx
    }
    #[inline]
    fn object_type(&self) -> MemObjectType {
        MemObjectType::Buffer
    }
    #[inline]
    fn flags(&self) -> MemFlags {
        self.flags
    }
    #[inline]
    fn size(&self) -> usize {
        self.len * size_of::<T>()
    }
    fn release(&self) -> Result<(), Error> {
        let result = self.handle.release();
        self.last_error.record("release buffer", result)
    }
    #[inline]
    fn last_error(&self) -> ErrorCode {
        self.last_error.get()
    }
}

impl<T> fmt::Debug for Buffer<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Buffer<{}>({:?}, len = {})",
            std::any::type_name::<T>(),
            self.handle.raw(),
            self.len
        )
    }
}

#[cfg(test)]
mod test {
    use crate::{test_utils::context, ErrorCode, MemFlags, MemObject};

    #[test]
    fn test_double_release() {
        let ctx = context();
        let buf = ctx.create_buffer::<u32>(16, MemFlags::READ_WRITE).unwrap();
        assert!(!buf.raw().is_null());
        buf.release().unwrap();
        assert!(buf.raw().is_null());
        buf.release().unwrap();
        assert_eq!(buf.last_error(), ErrorCode::SUCCESS);
    }
}
