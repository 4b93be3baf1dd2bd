use crate::{ErrorCode, EventCallback, ExecStatus, ProfilingParam, RawHandle};
use log::{error, trace};
use std::{
    mem::take,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{
            AtomicBool, AtomicUsize,
            Ordering::{AcqRel, Acquire, Release},
        },
        mpsc::{channel, Sender},
        Arc, Condvar, Mutex,
    },
    thread::{self, JoinHandle},
    time::Instant,
};

/// 模拟设备上的事件状态。
///
/// 状态值按原生约定编码：3 排队，2 已提交，1 运行中，0 完成，负数为错误。
/// 状态只会减小，到达 0 或负数后不再改变。
pub(super) struct EventState {
    pub handle: RawHandle,
    pub context: RawHandle,
    pub queue: Option<RawHandle>,
    pub user: bool,
    profiling: bool,
    epoch: Instant,
    inner: Mutex<Inner>,
    cond: Condvar,
}

struct Inner {
    status: i32,
    stamps: [u64; 4],
    dependents: Vec<Edge>,
    callbacks: Vec<(i32, EventCallback)>,
}

/// 依赖边。`propagate` 为假时只约束顺序，前驱失败不影响后继。
struct Edge {
    pending: Arc<Pending>,
    propagate: bool,
}

impl EventState {
    pub fn new(
        handle: RawHandle,
        context: RawHandle,
        queue: Option<RawHandle>,
        profiling: bool,
        epoch: Instant,
    ) -> Self {
        let mut stamps = [0; 4];
        stamps[0] = epoch.elapsed().as_nanos() as _;
        Self {
            handle,
            context,
            queue,
            user: false,
            profiling,
            epoch,
            inner: Mutex::new(Inner {
                status: ExecStatus::RAW_QUEUED,
                stamps,
                dependents: vec![],
                callbacks: vec![],
            }),
            cond: Condvar::new(),
        }
    }

    /// 用户事件，创建即处于已提交状态。
    pub fn user(handle: RawHandle, context: RawHandle, epoch: Instant) -> Self {
        let mut ans = Self::new(handle, context, None, false, epoch);
        ans.user = true;
        ans.inner.get_mut().unwrap().status = ExecStatus::RAW_SUBMITTED;
        ans
    }

    #[inline]
    pub fn status(&self) -> i32 {
        self.inner.lock().unwrap().status
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.status() <= ExecStatus::RAW_COMPLETE
    }

    /// 推进状态。状态不前进时返回 `false`。
    pub fn advance(&self, status: i32, callbacks: &Callbacks) -> bool {
        let (dependents, ready) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.status <= ExecStatus::RAW_COMPLETE || status >= inner.status {
                return false;
            }
            trace!(
                "event {:?} on {:?}: {} -> {status}",
                self.handle,
                self.queue,
                inner.status
            );
            inner.status = status;

            let now = self.epoch.elapsed().as_nanos() as u64;
            match status {
                ExecStatus::RAW_SUBMITTED => inner.stamps[1] = now,
                ExecStatus::RAW_RUNNING => inner.stamps[2] = now,
                _ => {
                    for stamp in &mut inner.stamps[1..] {
                        if *stamp == 0 {
                            *stamp = now
                        }
                    }
                    inner.stamps[3] = now
                }
            }

            let (ready, rest) = take(&mut inner.callbacks)
                .into_iter()
                .partition::<Vec<_>, _>(|(threshold, _)| status <= *threshold);
            inner.callbacks = rest;

            if status <= ExecStatus::RAW_COMPLETE {
                self.cond.notify_all();
                (take(&mut inner.dependents), ready)
            } else {
                (vec![], ready)
            }
        };
        for (_, f) in ready {
            callbacks.post(Box::new(move || f(status)))
        }
        for Edge { pending, propagate } in dependents {
            pending.resolve(propagate && status < 0, callbacks)
        }
        true
    }

    /// 阻塞到事件结束，返回最终状态。
    pub fn wait(&self) -> i32 {
        let inner = self
            .cond
            .wait_while(self.inner.lock().unwrap(), |inner| {
                inner.status > ExecStatus::RAW_COMPLETE
            })
            .unwrap();
        inner.status
    }

    /// 登记回调，已经越过阈值时立即派发。
    pub fn on_status(&self, threshold: i32, f: EventCallback, callbacks: &Callbacks) {
        let mut inner = self.inner.lock().unwrap();
        let status = inner.status;
        if status <= threshold {
            drop(inner);
            callbacks.post(Box::new(move || f(status)))
        } else {
            inner.callbacks.push((threshold, f))
        }
    }

    /// 登记依赖这个事件的命令。已经结束时直接解除这条依赖。
    pub(super) fn add_dependent(&self, pending: &Arc<Pending>, propagate: bool, callbacks: &Callbacks) {
        let mut inner = self.inner.lock().unwrap();
        let status = inner.status;
        if status <= ExecStatus::RAW_COMPLETE {
            drop(inner);
            pending.resolve(propagate && status < 0, callbacks)
        } else {
            inner.dependents.push(Edge {
                pending: pending.clone(),
                propagate,
            })
        }
    }

    pub fn profiling(&self, param: ProfilingParam) -> Result<u64, ErrorCode> {
        let inner = self.inner.lock().unwrap();
        if !self.profiling || inner.status != ExecStatus::RAW_COMPLETE {
            return Err(ErrorCode::PROFILING_INFO_NOT_AVAILABLE);
        }
        Ok(inner.stamps[match param {
            ProfilingParam::Queued => 0,
            ProfilingParam::Submit => 1,
            ProfilingParam::Start => 2,
            ProfilingParam::End => 3,
        }])
    }
}

pub(super) type Job = Box<dyn FnOnce() -> Result<(), ErrorCode> + Send>;

/// 等待依赖的命令。
///
/// 计数包含一个创建者持有的份额，登记完所有依赖后由创建者释放，避免依赖中途全部结束时提前发射。
pub(super) struct Pending {
    remaining: AtomicUsize,
    failed: AtomicBool,
    job: Mutex<Option<Job>>,
    event: Arc<EventState>,
    launch: Box<dyn Fn(Arc<Pending>) + Send + Sync>,
}

impl Pending {
    pub fn new(
        deps: usize,
        event: Arc<EventState>,
        job: Job,
        launch: Box<dyn Fn(Arc<Pending>) + Send + Sync>,
    ) -> Arc<Self> {
        Arc::new(Self {
            remaining: AtomicUsize::new(deps + 1),
            failed: AtomicBool::new(false),
            job: Mutex::new(Some(job)),
            event,
            launch,
        })
    }

    /// 解除一条依赖。最后一条解除时提交或以依赖失败结束命令。
    pub fn resolve(self: &Arc<Self>, failed: bool, callbacks: &Callbacks) {
        if failed {
            self.failed.store(true, Release)
        }
        if self.remaining.fetch_sub(1, AcqRel) != 1 {
            return;
        }
        if self.failed.load(Acquire) {
            self.job.lock().unwrap().take();
            self.event.advance(
                ErrorCode::EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST.0,
                callbacks,
            );
        } else {
            self.event.advance(ExecStatus::RAW_SUBMITTED, callbacks);
            (self.launch)(self.clone())
        }
    }

    /// 在执行器线程上运行命令，命令恐慌时以资源不足结束。
    pub fn run(&self, callbacks: &Callbacks) {
        let Some(job) = self.job.lock().unwrap().take() else {
            return;
        };
        self.event.advance(ExecStatus::RAW_RUNNING, callbacks);
        let status = match catch_unwind(AssertUnwindSafe(job)) {
            Ok(Ok(())) => ExecStatus::RAW_COMPLETE,
            Ok(Err(code)) => code.0,
            Err(_) => {
                error!("command of event {:?} panicked", self.event.handle);
                ErrorCode::OUT_OF_RESOURCES.0
            }
        };
        self.event.advance(status, callbacks);
    }
}

type Task = Box<dyn FnOnce() + Send>;

/// 回调派发线程。
pub(super) struct Callbacks {
    sender: Mutex<Option<Sender<Task>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Callbacks {
    pub fn new() -> std::io::Result<Self> {
        let (sender, receiver) = channel::<Task>();
        let thread = thread::Builder::new()
            .name("clhost-callback".into())
            .spawn(move || {
                for task in receiver {
                    if catch_unwind(AssertUnwindSafe(task)).is_err() {
                        error!("event callback panicked")
                    }
                }
            })?;
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn post(&self, task: Task) {
        if let Some(sender) = &*self.sender.lock().unwrap() {
            if sender.send(task).is_err() {
                error!("callback thread is gone")
            }
        }
    }
}

impl Drop for Callbacks {
    fn drop(&mut self) {
        self.sender.lock().unwrap().take();
        if let Some(thread) = self.thread.lock().unwrap().take() {
            // 在回调线程上析构时不能等待自己
            if thread.thread().id() != thread::current().id() {
                let _ = thread.join();
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::mpsc::channel;

    fn state(epoch: Instant) -> Arc<EventState> {
        Arc::new(EventState::new(RawHandle(1), RawHandle(2), None, true, epoch))
    }

    #[test]
    fn test_monotonic() {
        let callbacks = Callbacks::new().unwrap();
        let event = state(Instant::now());
        assert!(event.advance(ExecStatus::RAW_RUNNING, &callbacks));
        assert!(!event.advance(ExecStatus::RAW_SUBMITTED, &callbacks));
        assert!(event.advance(ExecStatus::RAW_COMPLETE, &callbacks));
        assert!(!event.advance(ErrorCode::OUT_OF_RESOURCES.0, &callbacks));
        assert_eq!(event.wait(), ExecStatus::RAW_COMPLETE);
        assert!(event.profiling(ProfilingParam::End).is_ok());
    }

    #[test]
    fn test_pending() {
        let callbacks = Arc::new(Callbacks::new().unwrap());
        let epoch = Instant::now();
        let a = state(epoch);
        let b = state(epoch);
        let c = state(epoch);

        let (tx, rx) = channel();
        let cb = callbacks.clone();
        let pending = Pending::new(
            2,
            c.clone(),
            Box::new(move || {
                tx.send(()).unwrap();
                Ok(())
            }),
            Box::new(move |p: Arc<Pending>| p.run(&cb)),
        );
        a.add_dependent(&pending, true, &callbacks);
        b.add_dependent(&pending, false, &callbacks);
        pending.resolve(false, &callbacks);
        assert_eq!(c.status(), ExecStatus::RAW_QUEUED);

        // 只约束顺序的依赖失败不影响命令
        b.advance(ErrorCode::OUT_OF_RESOURCES.0, &callbacks);
        assert_eq!(c.status(), ExecStatus::RAW_QUEUED);
        a.advance(ExecStatus::RAW_COMPLETE, &callbacks);
        rx.recv().unwrap();
        assert_eq!(c.wait(), ExecStatus::RAW_COMPLETE);
    }

    #[test]
    fn test_propagate() {
        let callbacks = Arc::new(Callbacks::new().unwrap());
        let epoch = Instant::now();
        let a = state(epoch);
        let c = state(epoch);
        let pending = Pending::new(
            1,
            c.clone(),
            Box::new(|| unreachable!()),
            Box::new(|_| unreachable!()),
        );
        a.add_dependent(&pending, true, &callbacks);
        pending.resolve(false, &callbacks);
        a.advance(ErrorCode::INVALID_OPERATION.0, &callbacks);
        assert_eq!(
            c.wait(),
            ErrorCode::EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST.0
        );
    }
}
