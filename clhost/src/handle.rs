use crate::{ErrorCode, Runtime};
use log::{debug, error};
use std::{
    fmt,
    sync::{
        atomic::{
            AtomicUsize,
            Ordering::{AcqRel, Acquire},
        },
        Arc,
    },
};

/// 原生运行时对象的不透明句柄，宽度与机器字相同。
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct RawHandle(pub usize);

impl RawHandle {
    pub const NULL: Self = Self(0);

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for RawHandle {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// 需要显式释放的对象种类。平台和设备不需要释放。
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ObjectKind {
    Context,
    CommandQueue,
    MemObject,
    Sampler,
    Program,
    Kernel,
    Event,
}

/// 独占一个原生句柄，保证恰好释放一次。
///
/// [`Owned::release`] 先把句柄换成空再调用原生释放，所以重复释放是无操作；
/// 析构时自动释放。
pub(crate) struct Owned {
    runtime: Arc<dyn Runtime>,
    kind: ObjectKind,
    raw: AtomicUsize,
}

impl Owned {
    #[inline]
    pub fn new(runtime: Arc<dyn Runtime>, kind: ObjectKind, raw: RawHandle) -> Self {
        debug!("acquire {kind:?} {raw:?}");
        Self {
            runtime,
            kind,
            raw: AtomicUsize::new(raw.0),
        }
    }

    /// 当前句柄，释放后为 [`RawHandle::NULL`]。
    #[inline]
    pub fn raw(&self) -> RawHandle {
        RawHandle(self.raw.load(Acquire))
    }

    #[inline]
    pub fn runtime(&self) -> &Arc<dyn Runtime> {
        &self.runtime
    }

    pub fn release(&self) -> Result<(), ErrorCode> {
        let raw = RawHandle(self.raw.swap(0, AcqRel));
        if raw.is_null() {
            return Ok(());
        }
        debug!("release {:?} {raw:?}", self.kind);
        self.runtime.release(self.kind, raw)
    }
}

impl Drop for Owned {
    fn drop(&mut self) {
        if let Err(code) = self.release() {
            error!("failed to release {:?}: {code}", self.kind)
        }
    }
}

impl fmt::Debug for Owned {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}({:?})", self.kind, self.raw())
    }
}
