// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Execution contexts
//!
//! A context is the per-client state an engine executes: a ring buffer, a
//! timeline and (for render/compute) a logical ring context image. The
//! context itself is reference counted through `Arc`; the pin count is a
//! separate counter that keeps the backing objects bound in the GGTT.
//!
//! Pinning has two paths. Once pinned, further pins are a single atomic
//! increment. The first pin locks the backing objects in a wound-wait
//! transaction, binds them, activates the context and publishes
//! `pin_count = 1` under the pin mutex, so only one thread ever performs
//! the 0→1 transition.
//!
//! Activation is tracked separately from pinning: while active the context
//! holds a reference to itself and to its backing objects, and it only
//! lets go of them once every pin and every outstanding request is gone.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use bitflags::bitflags;
use parking_lot::{Mutex, MutexGuard};

use crate::active::ActiveTracker;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::gem::GemFlags;
use crate::gtt::{AddressSpace, Vma};
use crate::request::Request;
use crate::ring::Ring;
use crate::timeline::Timeline;
use crate::ww::{ww_transaction, CancelToken, WwAcquireCtx};

/// Default ring size for new contexts.
pub const DEFAULT_RING_SIZE: u32 = 4096;

const PIN_MUTEX_SLICE: Duration = Duration::from_millis(1);

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

macro_rules! ce_trace {
    ($ce:expr, $($arg:tt)*) => {
        if cfg!(feature = "debug-logging") {
            log::trace!(
                "inteld: ctx{} {}: {}",
                $ce.id,
                $ce.engine.name(),
                format_args!($($arg)*)
            );
        }
    };
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ContextFlags: u32 {
        /// Backing state allocated.
        const ALLOC = 1 << 0;
        /// Image holds a valid saved state.
        const VALID = 1 << 1;
        const CLOSED = 1 << 2;
        const BANNED = 1 << 3;
        /// Requests may not be preempted once running.
        const NOPREEMPT = 1 << 4;
    }
}

/// Scheduling knobs of one context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulePolicy {
    pub preempt_timeout_ms: u32,
    pub timeslice_duration_ms: u32,
    pub preempt_disable_count: i32,
}

struct ContextState {
    ring: Ring,
    timeline: Timeline,
    image: Option<Arc<Vma>>,
}

#[derive(Default)]
struct Parallel {
    parent: Weak<IntelContext>,
    children: Vec<Arc<IntelContext>>,
    child_index: usize,
}

#[derive(Default)]
struct RuntimeStats {
    total_ns: AtomicU64,
    avg_ns: AtomicU64,
    samples: AtomicU64,
}

pub struct IntelContext {
    id: u64,
    engine: Arc<Engine>,
    vm: Arc<AddressSpace>,
    this: Weak<IntelContext>,
    ring_size: AtomicU32,
    flags: AtomicU32,
    pin_count: AtomicU32,
    pin_mutex: Mutex<()>,
    state: OnceLock<ContextState>,
    active: ActiveTracker,
    active_ref: spin::Mutex<Option<Arc<IntelContext>>>,
    active_count: AtomicU32,
    policy: Mutex<SchedulePolicy>,
    parallel: Mutex<Parallel>,
    stats: RuntimeStats,
}

impl fmt::Debug for IntelContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntelContext")
            .field("id", &self.id)
            .field("engine", &self.engine.name())
            .field("pin_count", &self.pin_count())
            .field("flags", &self.flags())
            .finish()
    }
}

/// Lock `mutex`, giving up with `Interrupted` once `cancel` fires.
fn lock_interruptible<'a>(
    mutex: &'a Mutex<()>,
    cancel: Option<&CancelToken>,
) -> Result<MutexGuard<'a, ()>> {
    let Some(cancel) = cancel else {
        return Ok(mutex.lock());
    };

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Interrupted);
        }
        if let Some(guard) = mutex.try_lock_for(PIN_MUTEX_SLICE) {
            return Ok(guard);
        }
    }
}

impl IntelContext {
    /// New context on `engine` with a private address space.
    pub fn create(engine: &Arc<Engine>) -> Arc<Self> {
        let id = NEXT_CONTEXT_ID.load(Ordering::Relaxed);
        Self::create_with_vm(engine, &AddressSpace::new(id as u32))
    }

    /// New context on `engine` sharing `vm`.
    pub fn create_with_vm(engine: &Arc<Engine>, vm: &Arc<AddressSpace>) -> Arc<Self> {
        let props = engine.props();
        let ctx = Arc::new_cyclic(|this| Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            engine: Arc::clone(engine),
            vm: Arc::clone(vm),
            this: this.clone(),
            ring_size: AtomicU32::new(DEFAULT_RING_SIZE),
            flags: AtomicU32::new(0),
            pin_count: AtomicU32::new(0),
            pin_mutex: Mutex::new(()),
            state: OnceLock::new(),
            active: ActiveTracker::new(),
            active_ref: spin::Mutex::new(None),
            active_count: AtomicU32::new(0),
            policy: Mutex::new(SchedulePolicy {
                preempt_timeout_ms: props.preempt_timeout_ms,
                timeslice_duration_ms: props.timeslice_duration_ms,
                preempt_disable_count: 0,
            }),
            parallel: Mutex::new(Parallel::default()),
            stats: RuntimeStats::default(),
        });
        ce_trace!(ctx, "created");
        ctx
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn vm(&self) -> &Arc<AddressSpace> {
        &self.vm
    }

    pub fn flags(&self) -> ContextFlags {
        ContextFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    fn set_flags(&self, flags: ContextFlags) -> ContextFlags {
        ContextFlags::from_bits_truncate(self.flags.fetch_or(flags.bits(), Ordering::AcqRel))
    }

    pub fn set_nopreempt(&self) {
        self.set_flags(ContextFlags::NOPREEMPT);
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    pub fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    pub fn is_active(&self) -> bool {
        !self.active.is_idle()
    }

    pub fn is_closed(&self) -> bool {
        self.flags().contains(ContextFlags::CLOSED)
    }

    pub fn is_banned(&self) -> bool {
        self.flags().contains(ContextFlags::BANNED)
    }

    pub fn ring_size(&self) -> u32 {
        self.ring_size.load(Ordering::Acquire)
    }

    /// Only possible before the backing state exists.
    pub fn set_ring_size(&self, size: u32) -> Result<()> {
        if !size.is_power_of_two() {
            return Err(Error::InvalidArgument("ring size must be a power of two"));
        }
        let _guard = self.pin_mutex.lock();
        if self.flags().contains(ContextFlags::ALLOC) {
            return Err(Error::Busy);
        }
        self.ring_size.store(size, Ordering::Release);
        Ok(())
    }

    pub fn ring(&self) -> Option<&Ring> {
        self.state.get().map(|s| &s.ring)
    }

    pub fn timeline(&self) -> Option<&Timeline> {
        self.state.get().map(|s| &s.timeline)
    }

    pub fn image(&self) -> Option<&Arc<Vma>> {
        self.state.get().and_then(|s| s.image.as_ref())
    }

    fn check_pinnable(&self) -> Result<()> {
        let flags = self.flags();
        if flags.contains(ContextFlags::CLOSED) {
            return Err(Error::Closed);
        }
        if flags.contains(ContextFlags::BANNED) {
            return Err(Error::Banned);
        }
        Ok(())
    }

    /// Allocate the ring, timeline and context image.
    pub fn alloc_state(&self) -> Result<()> {
        self.alloc_state_interruptible(None)
    }

    fn alloc_state_interruptible(&self, cancel: Option<&CancelToken>) -> Result<()> {
        let _guard = lock_interruptible(&self.pin_mutex, cancel)?;

        let flags = self.flags();
        if flags.contains(ContextFlags::ALLOC) {
            return Ok(());
        }
        if flags.contains(ContextFlags::BANNED) {
            return Err(Error::Banned);
        }

        let gem = self.engine.gem();
        let ggtt = self.engine.ggtt();
        let ring = Ring::new(gem, ggtt, self.ring_size())?;
        let timeline = Timeline::new(gem, ggtt)?;
        let image = match self.engine.context_size() {
            0 => None,
            size => {
                let obj = gem.create_internal(size as usize, GemFlags::GPU_ACCESS)?;
                Some(Vma::new(obj, Arc::clone(ggtt)))
            }
        };

        self.state
            .set(ContextState {
                ring,
                timeline,
                image,
            })
            .map_err(|_| Error::Busy)?;
        self.set_flags(ContextFlags::ALLOC);
        ce_trace!(self, "state allocated");
        Ok(())
    }

    fn pin_if_active(&self) -> bool {
        self.pin_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                (c > 0).then_some(c + 1)
            })
            .is_ok()
    }

    pub fn pin(&self) -> Result<()> {
        self.pin_with(None)
    }

    /// Pin, aborting any sleep with `Interrupted` once `cancel` fires.
    pub fn pin_interruptible(&self, cancel: &CancelToken) -> Result<()> {
        self.pin_with(Some(cancel))
    }

    fn pin_with(&self, cancel: Option<&CancelToken>) -> Result<()> {
        self.check_pinnable()?;
        if self.pin_if_active() {
            return Ok(());
        }
        ww_transaction(cancel, |ww| self.pin_slow(ww))
    }

    /// Pin inside a caller-owned transaction. `Deadlock` is returned to the
    /// caller, who must back off and retry.
    pub fn pin_ww(&self, ww: &mut WwAcquireCtx) -> Result<()> {
        self.check_pinnable()?;
        if self.pin_if_active() {
            return Ok(());
        }
        self.pin_slow(ww)
    }

    fn pin_slow(&self, ww: &mut WwAcquireCtx) -> Result<()> {
        if !self.flags().contains(ContextFlags::ALLOC) {
            self.alloc_state_interruptible(ww.cancel_token())?;
        }
        let state = self
            .state
            .get()
            .ok_or(Error::InvalidArgument("context state missing"))?;

        ww.lock(state.timeline.hwsp_object())?;
        ww.lock(state.ring.object())?;
        if let Some(image) = &state.image {
            ww.lock(image.object())?;
        }

        self.pre_pin(state, ww)?;
        let result = self.pin_locked(state, ww.cancel_token());
        self.post_unpin(state);

        ww.unlock_single(state.timeline.hwsp_object().as_ref());
        result
    }

    fn pre_pin(&self, state: &ContextState, ww: &WwAcquireCtx) -> Result<()> {
        state.ring.pin(ww)?;

        if let Err(e) = state.timeline.pin(ww) {
            state.ring.unpin();
            return Err(e);
        }

        if let Some(image) = &state.image {
            if let Err(e) = image.pin(ww) {
                state.timeline.unpin();
                state.ring.unpin();
                return Err(e);
            }
        }
        Ok(())
    }

    fn post_unpin(&self, state: &ContextState) {
        if let Some(image) = &state.image {
            image.unpin();
        }
        state.timeline.unpin();
        state.ring.unpin();
    }

    fn pin_locked(&self, state: &ContextState, cancel: Option<&CancelToken>) -> Result<()> {
        // temporary activation, keeps the objects bound across the handoff
        self.active.acquire(|| self.on_active(state))?;

        let result = self.pin_handoff(cancel);

        let retired = self.active.release(|| self.on_retire(state));
        drop(retired);
        result
    }

    fn pin_handoff(&self, cancel: Option<&CancelToken>) -> Result<()> {
        let _guard = lock_interruptible(&self.pin_mutex, cancel)?;

        self.check_pinnable()?;

        if self.pin_if_active() {
            return Ok(());
        }

        // held until the last unpin
        self.active.acquire(|| self.on_active_unchecked())?;
        self.pin_count.fetch_add(1, Ordering::AcqRel);
        ce_trace!(self, "pinned");
        Ok(())
    }

    fn on_active_unchecked(&self) -> Result<()> {
        let state = self
            .state
            .get()
            .ok_or(Error::InvalidArgument("context state missing"))?;
        self.on_active(state)
    }

    fn on_active(&self, state: &ContextState) -> Result<()> {
        let this = self
            .this
            .upgrade()
            .ok_or(Error::InvalidArgument("activating a dying context"))?;

        state.ring.pin_fast();
        state.timeline.pin_fast();
        if let Some(image) = &state.image {
            image.pin_fast();
            image.make_unshrinkable();
        }
        self.vm.context_activated(self.engine.gt_id());

        *self.active_ref.lock() = Some(this);
        ce_trace!(self, "active");
        Ok(())
    }

    /// Returns the self reference so it is dropped outside the tracker.
    fn on_retire(&self, state: &ContextState) -> Option<Arc<IntelContext>> {
        self.set_flags(ContextFlags::VALID);
        self.vm.context_retired(self.engine.gt_id());

        if let Some(image) = &state.image {
            image.make_shrinkable();
            image.unpin();
        }
        state.timeline.unpin();
        state.ring.unpin();

        ce_trace!(self, "retire");
        self.active_ref.lock().take()
    }

    fn active_retire(&self) {
        let Some(state) = self.state.get() else {
            return;
        };
        let retired = self.active.release(|| self.on_retire(state));
        drop(retired);
    }

    pub fn unpin(&self) {
        self.unpin_n(1)
    }

    pub fn unpin_n(&self, count: u32) {
        let prev = self
            .pin_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(count));

        match prev {
            Err(c) => {
                log::error!(
                    "inteld: ctx{} unbalanced unpin of {} with pin count {}",
                    self.id,
                    count,
                    c
                );
            }
            Ok(c) if c == count && count > 0 => {
                ce_trace!(self, "unpinned");
                self.active_retire();
            }
            Ok(_) => {}
        }
    }

    /// Extra activity reference held by a request until it retires.
    pub(crate) fn active_acquire_if_busy(&self) -> bool {
        self.active.acquire_if_busy()
    }

    pub(crate) fn active_release(&self) {
        self.active_retire();
    }

    /// Mark closed; later pins fail with `Closed`.
    pub fn close(&self) {
        self.set_flags(ContextFlags::CLOSED);
        ce_trace!(self, "closed");
    }

    /// Ban the context. Returns true only for the call that banned it.
    pub fn ban(&self) -> bool {
        let prev = self.set_flags(ContextFlags::BANNED);
        if prev.contains(ContextFlags::BANNED) {
            return false;
        }
        log::info!("inteld: ctx{} on {} banned", self.id, self.engine.name());
        true
    }

    pub fn schedule_policy(&self) -> SchedulePolicy {
        *self.policy.lock()
    }

    pub fn disable_preemption_timeout(&self) {
        let mut policy = self.policy.lock();
        policy.preempt_disable_count += 1;
        if policy.preempt_disable_count == 1 {
            policy.preempt_timeout_ms = 0;
        }
    }

    pub fn reset_preemption_timeout(&self) {
        let mut policy = self.policy.lock();
        if policy.preempt_disable_count <= 0 {
            log::warn!("inteld: ctx{} unbalanced preemption timeout reset", self.id);
            return;
        }

        policy.preempt_disable_count -= 1;
        if policy.preempt_disable_count == 0 {
            policy.preempt_timeout_ms = self.engine.props().preempt_timeout_ms;
        }
    }

    /// Refresh from the engine defaults, unless preemption is disabled.
    pub fn update_schedule_policy(&self) {
        let mut policy = self.policy.lock();
        if policy.preempt_disable_count != 0 {
            return;
        }
        let props = self.engine.props();
        policy.preempt_timeout_ms = props.preempt_timeout_ms;
        policy.timeslice_duration_ms = props.timeslice_duration_ms;
    }

    /// Make `child` part of `parent`'s parallel submission group. Both must
    /// be idle and neither may already be in a group of its own.
    pub fn bind_parent_child(parent: &Arc<Self>, child: &Arc<Self>) -> Result<()> {
        if Arc::ptr_eq(parent, child) {
            return Err(Error::InvalidArgument("context cannot be its own child"));
        }
        if parent.is_pinned() || child.is_pinned() {
            return Err(Error::Busy);
        }
        if parent.is_child() {
            return Err(Error::InvalidArgument("child context cannot be a parent"));
        }

        {
            let mut c = child.parallel.lock();
            if c.parent.strong_count() > 0 || !c.children.is_empty() {
                return Err(Error::InvalidArgument("context already in a parallel group"));
            }
            c.parent = Arc::downgrade(parent);
        }

        let mut p = parent.parallel.lock();
        child.parallel.lock().child_index = p.children.len();
        p.children.push(Arc::clone(child));
        Ok(())
    }

    pub fn is_parent(&self) -> bool {
        !self.parallel.lock().children.is_empty()
    }

    pub fn is_child(&self) -> bool {
        self.parallel.lock().parent.strong_count() > 0
    }

    pub fn parent(&self) -> Option<Arc<IntelContext>> {
        self.parallel.lock().parent.upgrade()
    }

    pub fn children(&self) -> Vec<Arc<IntelContext>> {
        self.parallel.lock().children.clone()
    }

    pub fn child_index(&self) -> usize {
        self.parallel.lock().child_index
    }

    /// First request in flight: wake the engine and the timeline.
    pub fn enter(&self) {
        if self.active_count.fetch_add(1, Ordering::AcqRel) == 0 {
            self.engine.pm_get();
            if let Some(tl) = self.timeline() {
                tl.enter();
            }
        }
    }

    pub fn exit(&self) {
        let prev = self.active_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "unbalanced context exit");
        if prev == 1 {
            if let Some(tl) = self.timeline() {
                tl.exit();
            }
            self.engine.pm_put();
        }
    }

    pub fn record_runtime(&self, ns: u64) {
        self.stats.total_ns.fetch_add(ns, Ordering::Relaxed);
        let first = self.stats.samples.fetch_add(1, Ordering::Relaxed) == 0;
        let _ = self
            .stats
            .avg_ns
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |avg| {
                Some(if first {
                    ns
                } else {
                    avg.saturating_mul(7).saturating_add(ns) / 8
                })
            });
    }

    pub fn total_runtime_ns(&self) -> u64 {
        self.stats.total_ns.load(Ordering::Relaxed)
    }

    /// Exponentially weighted average of recorded runtimes.
    pub fn avg_runtime_ns(&self) -> u64 {
        self.stats.avg_ns.load(Ordering::Relaxed)
    }

    /// Queue a new request on this context's timeline.
    pub fn create_request(&self) -> Result<Arc<Request>> {
        self.pin()?;
        let result = self.new_request();
        self.unpin();
        result
    }

    fn new_request(&self) -> Result<Arc<Request>> {
        let this = self
            .this
            .upgrade()
            .ok_or(Error::InvalidArgument("request on a dying context"))?;
        let state = self
            .state
            .get()
            .ok_or(Error::InvalidArgument("context state missing"))?;

        if !self.active_acquire_if_busy() {
            return Err(Error::InvalidArgument("pinned context not active"));
        }
        self.enter();

        let rq = Request::new(this, state.timeline.next_seqno());
        state.timeline.add_request(Arc::clone(&rq));
        ce_trace!(self, "request {}", rq.seqno());
        Ok(rq)
    }

    pub fn find_active_request(&self) -> Option<Arc<Request>> {
        self.timeline().and_then(|tl| tl.find_active_request())
    }

    /// Retire completed requests. Returns how many were retired.
    pub fn retire_requests(&self) -> usize {
        self.timeline().map_or(0, |tl| tl.retire_requests())
    }
}

impl Drop for IntelContext {
    fn drop(&mut self) {
        if self.pin_count() != 0 {
            log::warn!("inteld: ctx{} freed while pinned", self.id);
        }
        ce_trace!(self, "freed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineClass, EngineDesc, EngineProps};
    use crate::gem::GemManager;
    use crate::gtt::Ggtt;

    fn engine(class: EngineClass) -> Arc<Engine> {
        Engine::new(
            EngineDesc {
                id: 0,
                class,
                instance: 0,
                gt_id: 0,
                context_size: 2 * 4096,
                uses_guc: false,
                props: EngineProps {
                    preempt_timeout_ms: 640,
                    timeslice_duration_ms: 1,
                },
            },
            Arc::new(GemManager::new()),
            Arc::new(Ggtt::new(1 << 24)),
        )
    }

    #[test]
    fn test_pin_binds_backing_objects() {
        let ce = IntelContext::create(&engine(EngineClass::Render));
        assert!(!ce.flags().contains(ContextFlags::ALLOC));

        ce.pin().unwrap();
        assert_eq!(ce.pin_count(), 1);
        assert!(ce.is_active());
        assert!(ce.ring().unwrap().vma().is_bound());
        assert!(ce.timeline().unwrap().hwsp().is_bound());
        assert!(ce.image().unwrap().is_bound());
        assert!(!ce.image().unwrap().is_shrinkable());
        assert_eq!(ce.vm().active_contexts(0), 1);

        ce.unpin();
        assert!(!ce.is_active());
        assert!(!ce.ring().unwrap().vma().is_bound());
        assert!(!ce.image().unwrap().is_bound());
        assert!(ce.flags().contains(ContextFlags::VALID));
        assert_eq!(ce.vm().active_contexts(0), 0);
    }

    #[test]
    fn test_copy_engine_has_no_image() {
        let ce = IntelContext::create(&engine(EngineClass::Copy));
        ce.pin().unwrap();
        assert!(ce.image().is_none());
        ce.unpin();
    }

    #[test]
    fn test_active_holds_self_reference() {
        let ce = IntelContext::create(&engine(EngineClass::Render));
        assert_eq!(Arc::strong_count(&ce), 1);
        ce.pin().unwrap();
        assert_eq!(Arc::strong_count(&ce), 2);
        ce.unpin();
        assert_eq!(Arc::strong_count(&ce), 1);
    }

    #[test]
    fn test_unbalanced_unpin_is_ignored() {
        let ce = IntelContext::create(&engine(EngineClass::Copy));
        ce.pin().unwrap();
        ce.unpin_n(2);
        assert_eq!(ce.pin_count(), 1);
        ce.unpin();
        assert_eq!(ce.pin_count(), 0);
    }

    #[test]
    fn test_ban_reports_transition_once() {
        let ce = IntelContext::create(&engine(EngineClass::Copy));
        assert!(ce.ban());
        assert!(!ce.ban());
        assert_eq!(ce.pin(), Err(Error::Banned));
        assert_eq!(ce.alloc_state(), Err(Error::Banned));
    }

    #[test]
    fn test_ring_size_fixed_after_alloc() {
        let ce = IntelContext::create(&engine(EngineClass::Copy));
        assert!(ce.set_ring_size(3000).is_err());
        ce.set_ring_size(8192).unwrap();
        ce.alloc_state().unwrap();
        assert_eq!(ce.ring().unwrap().size(), 8192);
        assert_eq!(ce.set_ring_size(4096), Err(Error::Busy));
    }

    #[test]
    fn test_runtime_average() {
        let ce = IntelContext::create(&engine(EngineClass::Copy));
        ce.record_runtime(800);
        assert_eq!(ce.avg_runtime_ns(), 800);
        ce.record_runtime(0);
        assert_eq!(ce.avg_runtime_ns(), 700);
        assert_eq!(ce.total_runtime_ns(), 800);
    }
}
