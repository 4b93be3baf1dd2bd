use crate::{
    error::LastError, handle::Owned, AddressingMode, Context, Error, ErrorCode, FilterMode,
    ObjectKind, RawHandle,
};
use std::fmt;

/// 图像采样器。
pub struct Sampler<'ctx> {
    ctx: &'ctx Context,
    handle: Owned,
    normalized_coords: bool,
    addressing: AddressingMode,
    filter: FilterMode,
    last_error: LastError,
}

impl<'ctx> Sampler<'ctx> {
    pub(crate) fn new(
        ctx: &'ctx Context,
        raw: RawHandle,
        normalized_coords: bool,
        addressing: AddressingMode,
        filter: FilterMode,
    ) -> Self {
        Self {
            ctx,
            handle: Owned::new(ctx.runtime().clone(), ObjectKind::Sampler, raw),
            normalized_coords,
            addressing,
            filter,
            last_error: LastError::default(),
        }
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
    pub fn normalized_coords(&self) -> bool {
        self.normalized_coords
    }

    #[inline]
    pub fn addressing(&self) -> AddressingMode {
        self.addressing
    }

    #[inline]
    pub fn filter(&self) -> FilterMode {
        self.filter
    }

    #[inline]
    pub fn last_error(&self) -> ErrorCode {
        self.last_error.get()
    }

    pub fn release(&self) -> Result<(), Error> {
        let result = self.handle.release();
        self.last_error.record("release sampler", result)
    }
}

impl fmt::Debug for Sampler<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Sampler({:?}, {:?}, {:?})",
            self.raw(),
            self.addressing,
            self.filter
        )
    }
}
