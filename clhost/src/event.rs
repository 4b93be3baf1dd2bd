use crate::{
    error::{
        functions::{precondition, status},
        LastError,
    },
    handle::Owned,
    CommandType, Context, Error, ErrorCode, ExecStatus, ObjectKind, ProfilingParam, RawHandle,
};
use log::trace;
use std::{
    fmt,
    ops::Deref,
    sync::atomic::{
        AtomicBool,
        Ordering::{AcqRel, Release},
    },
};

/// 命令的执行事件。
pub struct Event<'ctx> {
    ctx: &'ctx Context,
    handle: Owned,
    queue: Option<RawHandle>,
    command: CommandType,
    last_error: LastError,
}

/// 命令的执行时间戳，单位纳秒。
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Profile {
    pub queued: u64,
    pub submit: u64,
    pub start: u64,
    pub end: u64,
}

impl Profile {
    /// 执行耗时。
    #[inline]
    pub fn duration(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }
}

impl<'ctx> Event<'ctx> {
    pub(crate) fn new(
        ctx: &'ctx Context,
        raw: RawHandle,
        queue: Option<RawHandle>,
        command: CommandType,
    ) -> Self {
        trace!("{command:?} -> event {raw:?}");
        Self {
            ctx,
            handle: Owned::new(ctx.runtime().clone(), ObjectKind::Event, raw),
            queue,
            command,
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

    /// 产生事件的队列，用户事件没有队列。
    #[inline]
    pub fn queue(&self) -> Option<RawHandle> {
        self.queue
    }

    #[inline]
    pub fn command(&self) -> CommandType {
        self.command
    }

    #[inline]
    pub fn last_error(&self) -> ErrorCode {
        self.last_error.get()
    }

    pub fn status(&self) -> Result<ExecStatus, Error> {
        let result = self.ctx.runtime().event_status(self.raw());
        self.last_error
            .record("event status", result)
            .map(ExecStatus::from_raw)
    }

    /// 阻塞到事件结束，命令失败时返回命令的错误码。
    pub fn wait(&self) -> Result<(), Error> {
        let result = self.ctx.runtime().wait_for_events(&[self.raw()]);
        match result {
            Ok(()) | Err(ErrorCode::EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST) => {}
            Err(code) => return self.last_error.fail(status(code, "wait for event")),
        }
        match self.status()? {
            ExecStatus::Error(code) => self
                .last_error
                .fail(status(code, format!("{:?} failed", self.command))),
            _ => Ok(()),
        }
    }

    /// 状态到达或越过 `threshold` 时调用 `callback`。
    ///
    /// 回调在运行时管理的线程上执行，不应阻塞。
    pub fn on_status(
        &self,
        threshold: ExecStatus,
        callback: impl FnOnce(ExecStatus) + Send + 'static,
    ) -> Result<(), Error> {
        if !matches!(
            threshold,
            ExecStatus::Submitted | ExecStatus::Running | ExecStatus::Complete
        ) {
            return self
                .last_error
                .fail(precondition(format!("callback threshold {threshold:?}")));
        }
        let result = self.ctx.runtime().set_event_callback(
            self.raw(),
            threshold.raw(),
            Box::new(move |raw| callback(ExecStatus::from_raw(raw))),
        );
        self.last_error.record("set event callback", result)
    }

    /// 命令的执行时间戳。需要队列开启性能分析，且命令已经完成。
    pub fn profiling(&self) -> Result<Profile, Error> {
        let runtime = self.ctx.runtime();
        let raw = self.raw();
        let get = |param| {
            let result = runtime.event_profiling(raw, param);
            self.last_error.record("event profiling", result)
        };
        Ok(Profile {
            queued: get(ProfilingParam::Queued)?,
            submit: get(ProfilingParam::Submit)?,
            start: get(ProfilingParam::Start)?,
            end: get(ProfilingParam::End)?,
        })
    }

    /// 释放事件，不影响对应命令的执行。
    pub fn release(&self) -> Result<(), Error> {
        let result = self.handle.release();
        self.last_error.record("release event", result)
    }
}

impl fmt::Debug for Event<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Event({:?}, {:?})", self.raw(), self.command)
    }
}

/// 阻塞到所有事件结束。全部成功完成时返回 `Ok`。
pub fn wait_for_all(events: &[&Event]) -> Result<(), Error> {
    let Some(first) = events.first() else {
        return Ok(());
    };
    let raws = events.iter().map(|e| e.raw()).collect::<Vec<_>>();
    let result = first.ctx.runtime().wait_for_events(&raws);
    first.last_error.record("wait for events", result)
}

/// 由宿主控制状态的事件。
///
/// 创建后处于 [`ExecStatus::Submitted`]，只能转变一次。
pub struct UserEvent<'ctx> {
    event: Event<'ctx>,
    settled: AtomicBool,
}

impl<'ctx> UserEvent<'ctx> {
    pub(crate) fn new(ctx: &'ctx Context, raw: RawHandle) -> Self {
        Self {
            event: Event::new(ctx, raw, None, CommandType::User),
            settled: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn set_complete(&self) -> Result<(), Error> {
        self.settle(ExecStatus::Complete)
    }

    /// 以错误码结束事件，依赖它的命令都将失败。`code` 必须是负数。
    pub fn set_error(&self, code: ErrorCode) -> Result<(), Error> {
        if code.0 >= 0 {
            return self
                .last_error
                .fail(precondition(format!("{code} is not an error")));
        }
        self.settle(ExecStatus::Error(code))
    }

    fn settle(&self, status: ExecStatus) -> Result<(), Error> {
        if self.settled.swap(true, AcqRel) {
            return self
                .last_error
                .fail(precondition("user event status already set"));
        }
        let result = self
            .ctx
            .runtime()
            .set_user_event_status(self.raw(), status.raw());
        if result.is_err() {
            self.settled.store(false, Release)
        }
        self.last_error.record("set user event status", result)
    }
}

impl<'ctx> Deref for UserEvent<'ctx> {
    type Target = Event<'ctx>;
    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.event
    }
}

impl fmt::Debug for UserEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "UserEvent({:?})", self.raw())
    }
}

#[cfg(test)]
mod test {
    use super::wait_for_all;
    use crate::{
        test_utils::{context, cpu},
        ErrorCode, ExecStatus, MemFlags, QueueProperties,
    };
    use std::sync::mpsc::channel;

    #[test]
    fn test_user_event_once() {
        let ctx = context();
        let event = ctx.create_user_event().unwrap();
        assert_eq!(event.status().unwrap(), ExecStatus::Submitted);
        assert!(event.queue().is_none());

        let runtime = cpu(&ctx);
        let before = runtime.stats().user_event_updates;
        event.set_complete().unwrap();
        assert_eq!(runtime.stats().user_event_updates, before + 1);
        assert_eq!(event.status().unwrap(), ExecStatus::Complete);

        let e = event.set_complete().unwrap_err();
        assert!(e.is_precondition());
        let e = event.set_error(ErrorCode::OUT_OF_RESOURCES).unwrap_err();
        assert!(e.is_precondition());
        assert_eq!(runtime.stats().user_event_updates, before + 1);
        assert_eq!(event.status().unwrap(), ExecStatus::Complete);
    }

    #[test]
    fn test_user_event_error() {
        let ctx = context();
        let event = ctx.create_user_event().unwrap();
        assert!(event.set_error(ErrorCode(1)).unwrap_err().is_precondition());
        event.set_error(ErrorCode::OUT_OF_RESOURCES).unwrap();
        assert_eq!(
            event.status().unwrap(),
            ExecStatus::Error(ErrorCode::OUT_OF_RESOURCES)
        );
        assert!(event.set_complete().unwrap_err().is_precondition());
        assert_eq!(
            event.wait().unwrap_err().code(),
            Some(ErrorCode::OUT_OF_RESOURCES)
        );
    }

    #[test]
    fn test_gate_and_propagate() {
        let ctx = context();
        let queue = ctx
            .create_queue(&ctx.devices()[0], QueueProperties::empty())
            .unwrap();
        let buf = ctx.create_buffer_from(&[0u32; 4], MemFlags::READ_WRITE).unwrap();

        let gate = ctx.create_user_event().unwrap();
        let fill = queue.fill_buffer(&buf, &[7u32], 0, 4, &[&gate]).unwrap();
        assert_eq!(fill.status().unwrap(), ExecStatus::Queued);

        let (tx, rx) = channel();
        fill.on_status(ExecStatus::Complete, move |status| {
            tx.send(status).unwrap()
        })
        .unwrap();

        gate.set_error(ErrorCode::INVALID_OPERATION).unwrap();
        assert_eq!(
            rx.recv().unwrap(),
            ExecStatus::Error(ErrorCode::EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST)
        );
        assert_eq!(
            wait_for_all(&[&fill]).unwrap_err().code(),
            Some(ErrorCode::EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST)
        );
    }

    #[test]
    fn test_wait_for_all() {
        wait_for_all(&[]).unwrap();

        let ctx = context();
        let queue = ctx
            .create_queue(&ctx.devices()[0], QueueProperties::OUT_OF_ORDER_EXEC_MODE_ENABLE)
            .unwrap();
        let buf = ctx.create_buffer::<u8>(64, MemFlags::READ_WRITE).unwrap();
        let events = (0..8)
            .map(|i| queue.fill_buffer(&buf, &[i as u8], i * 8, 8, &[]).unwrap())
            .collect::<Vec<_>>();
        wait_for_all(&events.iter().collect::<Vec<_>>()).unwrap();
        for e in &events {
            assert_eq!(e.status().unwrap(), ExecStatus::Complete)
        }
    }

    #[test]
    fn test_profiling() {
        let ctx = context();
        let plain = ctx
            .create_queue(&ctx.devices()[0], QueueProperties::empty())
            .unwrap();
        let buf = ctx.create_buffer::<u8>(16, MemFlags::READ_WRITE).unwrap();
        let e = plain.fill_buffer(&buf, &[1u8], 0, 16, &[]).unwrap();
        e.wait().unwrap();
        assert_eq!(
            e.profiling().unwrap_err().code(),
            Some(ErrorCode::PROFILING_INFO_NOT_AVAILABLE)
        );

        let profiled = ctx
            .create_queue(&ctx.devices()[0], QueueProperties::PROFILING_ENABLE)
            .unwrap();
        let e = profiled.fill_buffer(&buf, &[2u8], 0, 16, &[]).unwrap();
        e.wait().unwrap();
        let profile = e.profiling().unwrap();
        assert!(profile.queued <= profile.submit);
        assert!(profile.submit <= profile.start);
        assert!(profile.start <= profile.end);
    }

    #[test]
    fn test_callback_threshold() {
        let ctx = context();
        let event = ctx.create_user_event().unwrap();
        assert!(event
            .on_status(ExecStatus::Queued, |_| {})
            .unwrap_err()
            .is_precondition());

        // 已经越过阈值的事件立即回调
        let (tx, rx) = channel();
        event
            .on_status(ExecStatus::Submitted, move |status| tx.send(status).unwrap())
            .unwrap();
        assert_eq!(rx.recv().unwrap(), ExecStatus::Submitted);
    }
}
