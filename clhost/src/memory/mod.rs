mod buffer;
mod image;

pub use buffer::Buffer;
pub use image::Image;

use crate::{Context, Error, ErrorCode, MemFlags, MemObjectType, RawHandle};

/// 存储对象：缓冲或图像。
pub trait MemObject {
    /// 当前句柄，释放后为空。
    fn raw(&self) -> RawHandle;
    /// 所属的上下文。
    fn context(&self) -> &Context;
    fn object_type(&self) -> MemObjectType;
    fn flags(&self) -> MemFlags;
    /// 存储空间的字节数。
    fn size(&self) -> usize;
    /// 释放存储对象，重复释放没有效果。
    fn release(&self) -> Result<(), Error>;
    fn last_error(&self) -> ErrorCode;
}
