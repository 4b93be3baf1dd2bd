//! 模拟设备的对象表。
//!
//! 句柄是单调递增的编号，从不复用，释放后的句柄查不到对象。

use super::{
    blob::Storage,
    compiler::{Param, ParamKind},
    event::EventState,
    exec::{KernelFn, SamplerDesc},
};
use crate::{
    config::CpuDevice, ErrorCode, ImageDesc, ImageFormat, MemFlags, MemObjectType, ObjectKind,
    QueueProperties, RawHandle,
};
use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering::Relaxed},
        Arc, Mutex, RwLock,
    },
};

pub(super) struct PlatformState {
    pub name: String,
    pub vendor: String,
    pub version: String,
    pub devices: Vec<RawHandle>,
}

pub(super) struct DeviceState {
    pub platform: RawHandle,
    pub config: CpuDevice,
}

pub(super) struct ContextState {
    pub devices: Vec<RawHandle>,
}

pub(super) struct QueueState {
    pub context: RawHandle,
    pub device: RawHandle,
    pub properties: QueueProperties,
    pub order: Mutex<QueueOrder>,
}

/// 队列中决定命令先后的状态。
#[derive(Default)]
pub(super) struct QueueOrder {
    /// 最近入队的命令，顺序队列中的下一个命令依赖它。
    pub last: Option<Arc<EventState>>,
    /// 最近的屏障，乱序队列中此后的命令都依赖它。
    pub barrier: Option<Arc<EventState>>,
    /// 尚未结束的命令。
    pub outstanding: Vec<Arc<EventState>>,
}

impl QueueOrder {
    pub fn prune(&mut self) {
        self.outstanding.retain(|e| !e.is_terminal());
        if self.last.as_ref().is_some_and(|e| e.is_terminal()) {
            self.last = None
        }
        if self.barrier.as_ref().is_some_and(|e| e.is_terminal()) {
            self.barrier = None
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(super) struct ImageInfo {
    pub format: ImageFormat,
    pub desc: ImageDesc,
}

impl ImageInfo {
    /// 设备存储紧密排列，返回 y 和 z 方向的字节步长。
    #[inline]
    pub fn pitches(&self) -> [usize; 2] {
        let [w, h, _] = self.desc.region();
        let row = w * self.format.pixel_size();
        [row, row * h]
    }
}

pub(super) struct MemState {
    pub context: RawHandle,
    pub flags: MemFlags,
    pub ty: MemObjectType,
    pub size: usize,
    pub image: Option<ImageInfo>,
    pub storage: Arc<Storage>,
}

impl MemState {
    /// 宿主是否可以读取。
    #[inline]
    pub fn host_readable(&self) -> bool {
        !self
            .flags
            .intersects(MemFlags::HOST_WRITE_ONLY | MemFlags::HOST_NO_ACCESS)
    }

    #[inline]
    pub fn host_writable(&self) -> bool {
        !self
            .flags
            .intersects(MemFlags::HOST_READ_ONLY | MemFlags::HOST_NO_ACCESS)
    }
}

impl fmt::Debug for MemState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}({} bytes, {:?})", self.ty, self.size, self.flags)
    }
}

pub(super) struct SamplerState {
    pub context: RawHandle,
    pub desc: SamplerDesc,
}

pub(super) struct ProgramState {
    pub context: RawHandle,
    pub devices: Vec<RawHandle>,
    pub source: String,
    pub build: Mutex<BuildState>,
}

#[derive(Default)]
pub(super) struct BuildState {
    /// 最近一次成功编译得到的核函数。
    pub kernels: Option<Vec<Arc<KernelDef>>>,
    pub logs: HashMap<RawHandle, String>,
}

pub(super) struct KernelDef {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Arc<KernelFn>,
}

pub(super) struct KernelState {
    pub context: RawHandle,
    pub def: Arc<KernelDef>,
    pub args: Mutex<Vec<Option<ArgValue>>>,
}

impl KernelState {
    pub fn new(context: RawHandle, def: Arc<KernelDef>) -> Self {
        let args = vec![None; def.params.len()];
        Self {
            context,
            def,
            args: Mutex::new(args),
        }
    }

    #[inline]
    pub fn param(&self, index: u32) -> Result<ParamKind, ErrorCode> {
        self.def
            .params
            .get(index as usize)
            .map(|p| p.kind)
            .ok_or(ErrorCode::INVALID_ARG_INDEX)
    }
}

/// 绑定在参数槽上的值。
#[derive(Clone, Debug)]
pub(super) enum ArgValue {
    Bytes(Vec<u8>),
    Mem(Option<Arc<MemState>>),
    Image(Arc<MemState>, ImageInfo),
    Sampler(SamplerDesc),
    /// 每个工作组的局部存储字节数。
    Local(usize),
}

pub(super) enum Object {
    Platform(Arc<PlatformState>),
    Device(Arc<DeviceState>),
    Context(Arc<ContextState>),
    Queue(Arc<QueueState>),
    Mem(Arc<MemState>),
    Sampler(Arc<SamplerState>),
    Program(Arc<ProgramState>),
    Kernel(Arc<KernelState>),
    Event(Arc<EventState>),
}

impl Object {
    fn kind(&self) -> Option<ObjectKind> {
        match self {
            Self::Platform(_) | Self::Device(_) => None,
            Self::Context(_) => Some(ObjectKind::Context),
            Self::Queue(_) => Some(ObjectKind::CommandQueue),
            Self::Mem(_) => Some(ObjectKind::MemObject),
            Self::Sampler(_) => Some(ObjectKind::Sampler),
            Self::Program(_) => Some(ObjectKind::Program),
            Self::Kernel(_) => Some(ObjectKind::Kernel),
            Self::Event(_) => Some(ObjectKind::Event),
        }
    }
}

/// 种类对应的无效句柄错误码。
pub(super) fn invalid(kind: ObjectKind) -> ErrorCode {
    match kind {
        ObjectKind::Context => ErrorCode::INVALID_CONTEXT,
        ObjectKind::CommandQueue => ErrorCode::INVALID_COMMAND_QUEUE,
        ObjectKind::MemObject => ErrorCode::INVALID_MEM_OBJECT,
        ObjectKind::Sampler => ErrorCode::INVALID_SAMPLER,
        ObjectKind::Program => ErrorCode::INVALID_PROGRAM,
        ObjectKind::Kernel => ErrorCode::INVALID_KERNEL,
        ObjectKind::Event => ErrorCode::INVALID_EVENT,
    }
}

pub(super) struct Table {
    next: AtomicUsize,
    objects: RwLock<HashMap<RawHandle, Object>>,
}

macro_rules! getter {
    ($name:ident $variant:ident $ty:ty => $code:ident) => {
        pub fn $name(&self, handle: RawHandle) -> Result<Arc<$ty>, ErrorCode> {
            match self.objects.read().unwrap().get(&handle) {
                Some(Object::$variant(obj)) => Ok(obj.clone()),
                _ => Err(ErrorCode::$code),
            }
        }
    };
}

impl Table {
    pub fn new() -> Self {
        Self {
            next: AtomicUsize::new(1),
            objects: RwLock::new(HashMap::new()),
        }
    }

    /// 分配一个新句柄。
    #[inline]
    pub fn alloc(&self) -> RawHandle {
        RawHandle(self.next.fetch_add(1, Relaxed))
    }

    #[inline]
    pub fn insert(&self, handle: RawHandle, obj: Object) {
        self.objects.write().unwrap().insert(handle, obj);
    }

    #[inline]
    pub fn add(&self, obj: Object) -> RawHandle {
        let handle = self.alloc();
        self.insert(handle, obj);
        handle
    }

    getter!(platform Platform PlatformState => INVALID_PLATFORM);
    getter!(device   Device   DeviceState   => INVALID_DEVICE);
    getter!(context  Context  ContextState  => INVALID_CONTEXT);
    getter!(queue    Queue    QueueState    => INVALID_COMMAND_QUEUE);
    getter!(mem      Mem      MemState      => INVALID_MEM_OBJECT);
    getter!(sampler  Sampler  SamplerState  => INVALID_SAMPLER);
    getter!(program  Program  ProgramState  => INVALID_PROGRAM);
    getter!(kernel   Kernel   KernelState   => INVALID_KERNEL);
    getter!(event    Event    EventState    => INVALID_EVENT);

    /// 移除对象，种类不符时不移除。
    pub fn remove(&self, kind: ObjectKind, handle: RawHandle) -> Result<(), ErrorCode> {
        let mut objects = self.objects.write().unwrap();
        match objects.get(&handle) {
            Some(obj) if obj.kind() == Some(kind) => {
                objects.remove(&handle);
                Ok(())
            }
            _ => Err(invalid(kind)),
        }
    }

    /// 按插入顺序列出平台。
    pub fn platforms(&self) -> Vec<RawHandle> {
        let objects = self.objects.read().unwrap();
        let mut ans = objects
            .iter()
            .filter(|(_, obj)| matches!(obj, Object::Platform(_)))
            .map(|(h, _)| *h)
            .collect::<Vec<_>>();
        ans.sort_unstable();
        ans
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_table() {
        let table = Table::new();
        let ctx = table.add(Object::Context(Arc::new(ContextState { devices: vec![] })));
        assert!(table.context(ctx).is_ok());
        assert_eq!(table.queue(ctx).err(), Some(ErrorCode::INVALID_COMMAND_QUEUE));
        assert_eq!(
            table.remove(ObjectKind::Event, ctx),
            Err(ErrorCode::INVALID_EVENT)
        );
        table.remove(ObjectKind::Context, ctx).unwrap();
        assert_eq!(table.context(ctx).err(), Some(ErrorCode::INVALID_CONTEXT));

        // 句柄不复用
        let next = table.add(Object::Context(Arc::new(ContextState { devices: vec![] })));
        assert!(next > ctx);
    }
}
