use std::{
    alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout},
    ptr::NonNull,
};

/// 对齐到机器字的堆上字节块，分配时清零。
pub(crate) struct Blob {
    ptr: NonNull<u8>,
    len: usize,
}

unsafe impl Send for Blob {}
unsafe impl Sync for Blob {}

impl Blob {
    pub fn new(size: usize) -> Self {
        let layout = layout(size.max(1));
        let ptr = unsafe { alloc_zeroed(layout) };
        Self {
            ptr: NonNull::new(ptr).unwrap_or_else(|| handle_alloc_error(layout)),
            len: size,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl Drop for Blob {
    #[inline]
    fn drop(&mut self) {
        let &mut Blob { ptr, len } = self;
        unsafe { dealloc(ptr.as_ptr(), layout(len.max(1))) }
    }
}

#[inline(always)]
const fn layout(size: usize) -> Layout {
    unsafe { Layout::from_size_align_unchecked(size, align_of::<usize>()) }
}

/// 存储对象的后备存储。
///
/// 设备侧的所有访问都经过裸指针，访问之间的冲突由命令的依赖关系排除，不另加锁。
pub(crate) enum Storage {
    Owned(Blob),
    /// 宿主提供的存储，调用者保证它在存储对象的生命期内有效。
    Host(NonNull<u8>),
}

unsafe impl Send for Storage {}
unsafe impl Sync for Storage {}

impl Storage {
    #[inline]
    pub fn ptr(&self) -> *mut u8 {
        match self {
            Self::Owned(blob) => blob.as_ptr(),
            Self::Host(ptr) => ptr.as_ptr(),
        }
    }
}

#[test]
fn test_blob() {
    let blob = Blob::new(100);
    assert_eq!(blob.len(), 100);
    assert_eq!(blob.as_ptr() as usize % align_of::<usize>(), 0);
    let bytes = unsafe { std::slice::from_raw_parts(blob.as_ptr(), blob.len()) };
    assert!(bytes.iter().all(|&b| b == 0));

    let empty = Blob::new(0);
    assert_eq!(empty.len(), 0);
}
