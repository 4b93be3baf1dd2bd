use super::blob::Blob;
use std::{
    alloc::{alloc, dealloc, Layout},
    ptr::null_mut,
    sync::atomic::{
        AtomicPtr,
        Ordering::{Acquire, Release},
    },
};

/// 局部存储块的无锁回收栈。
///
/// 每个工作组取一块定长存储，执行完放回，同时执行的工作组数决定实际分配的块数。
pub(super) struct LocalPool {
    size: usize,
    head: AtomicPtr<Item>,
}

struct Item {
    blob: Blob,
    next: *mut Item,
}

impl LocalPool {
    #[inline]
    pub fn new(size: usize) -> Self {
        Self {
            size,
            head: AtomicPtr::new(null_mut()),
        }
    }

    #[inline]
    fn update(&self, current: *mut Item, new: *mut Item) -> Option<*mut Item> {
        self.head
            .compare_exchange_weak(current, new, Release, Acquire)
            .err()
    }

    /// 取一块存储，内容是上一个使用者留下的。
    pub fn take(&self) -> Blob {
        let mut item = self.head.load(Acquire);
        while !item.is_null() {
            match self.update(item, unsafe { (*item).next }) {
                Some(current) => item = current,
                None => break,
            }
        }
        if item.is_null() {
            Blob::new(self.size)
        } else {
            let Item { blob, .. } = unsafe { item.read() };
            unsafe { dealloc(item as _, Layout::new::<Item>()) };
            blob
        }
    }

    pub fn put(&self, blob: Blob) {
        debug_assert_eq!(blob.len(), self.size);
        let item = unsafe { alloc(Layout::new::<Item>()) } as *mut Item;
        unsafe {
            item.write(Item {
                blob,
                next: self.head.load(Acquire),
            })
        };
        while let Some(current) = self.update(unsafe { (*item).next }, item) {
            unsafe { (*item).next = current };
        }
    }
}

unsafe impl Send for LocalPool {}
unsafe impl Sync for LocalPool {}

impl Drop for LocalPool {
    fn drop(&mut self) {
        let mut item = *self.head.get_mut();
        while !item.is_null() {
            let Item { blob, next } = unsafe { item.read() };
            drop(blob);
            unsafe { dealloc(item as _, Layout::new::<Item>()) };
            item = next;
        }
    }
}

#[test]
fn test_recycle() {
    let pool = LocalPool::new(64);
    let a = pool.take();
    let ptr = a.as_ptr();
    pool.put(a);
    let b = pool.take();
    assert_eq!(b.as_ptr(), ptr);
    let c = pool.take();
    assert_ne!(c.as_ptr(), ptr);
    assert_eq!(c.len(), 64);
    pool.put(b);
    pool.put(c);
}
