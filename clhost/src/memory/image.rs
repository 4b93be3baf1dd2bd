use super::MemObject;
use crate::{
    error::LastError, handle::Owned, ChannelOrder, ChannelType, Context, Error, ErrorCode,
    ImageDesc, ImageFormat, MemFlags, MemObjectType, ObjectKind, RawHandle,
};
use std::fmt;

/// 多维图像。
pub struct Image<'ctx> {
    ctx: &'ctx Context,
    handle: Owned,
    flags: MemFlags,
    format: ImageFormat,
    desc: ImageDesc,
    last_error: LastError,
}

impl<'ctx> Image<'ctx> {
    pub(crate) fn new(
        ctx: &'ctx Context,
        raw: RawHandle,
        flags: MemFlags,
        format: ImageFormat,
        desc: ImageDesc,
    ) -> Self {
        Self {
            ctx,
            handle: Owned::new(ctx.runtime().clone(), ObjectKind::MemObject, raw),
            flags,
            format,
            desc,
            last_error: LastError::default(),
        }
    }

    #[inline]
    pub fn format(&self) -> ImageFormat {
        self.format
    }

    #[inline]
    pub fn channel_order(&self) -> ChannelOrder {
        self.format.order
    }

    #[inline]
    pub fn channel_type(&self) -> ChannelType {
        self.format.data_type
    }

    #[inline]
    pub fn desc(&self) -> &ImageDesc {
        &self.desc
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.desc.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.desc.height
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.desc.depth
    }

    #[inline]
    pub fn array_size(&self) -> usize {
        self.desc.array_size
    }

    /// 覆盖整个图像的区域。
    #[inline]
    pub fn region(&self) -> [usize; 3] {
        self.desc.region()
    }

    #[inline]
    pub fn pixel_size(&self) -> usize {
        self.format.pixel_size()
    }
}

impl MemObject for Image<'_> {
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
        self.desc.ty
    }
    #[inline]
    fn flags(&self) -> MemFlags {
        self.flags
    }
    #[inline]
    fn size(&self) -> usize {
        self.region().iter().product::<usize>() * self.pixel_size()
    }
    fn release(&self) -> Result<(), Error> {
        let result = self.handle.release();
        self.last_error.record("release image", result)
    }
    #[inline]
    fn last_error(&self) -> ErrorCode {
        self.last_error.get()
    }
}

impl fmt::Debug for Image<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Image({:?}, {:?}, {:?})",
            self.handle.raw(),
            self.format,
            self.region()
        )
    }
}
