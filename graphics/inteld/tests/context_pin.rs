// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

use std::sync::{mpsc, Arc, Barrier};
use std::thread;
use std::time::Duration;

use inteld::gtt::GttEvent;
use inteld::mmio::{RegisterIo, SimMmio};
use inteld::ww::WwLockable;
use inteld::{CancelToken, DriverConfig, Error, IntelContext, IntelDevice};

fn device() -> IntelDevice {
    IntelDevice::builder(0x0bd5)
        .config(DriverConfig::default())
        .tile(Arc::new(SimMmio::new()) as Arc<dyn RegisterIo>)
        .build()
        .unwrap()
}

fn handles(ce: &IntelContext) -> (u32, u32, u32) {
    (
        ce.ring().unwrap().object().handle,
        ce.timeline().unwrap().hwsp_object().handle,
        ce.image().unwrap().object().handle,
    )
}

fn bound(ce: &IntelContext) -> bool {
    ce.ring().unwrap().vma().is_bound()
        || ce.timeline().unwrap().hwsp().is_bound()
        || ce.image().map_or(false, |image| image.is_bound())
}

#[test]
fn test_first_pin_binds_in_order_and_last_unpin_releases_in_reverse() {
    let dev = device();
    let rcs = dev.engine(0, "rcs0").unwrap();
    let ggtt = Arc::clone(rcs.ggtt());
    let ce = dev.create_context(rcs);

    ce.pin().unwrap();
    assert_eq!(ce.pin_count(), 1);
    assert!(ce.is_active());

    let (ring, hwsp, image) = handles(&ce);
    let binds: Vec<u32> = ggtt
        .trace()
        .iter()
        .filter_map(|e| match e {
            GttEvent::Bind { handle, .. } => Some(*handle),
            GttEvent::Unbind { .. } => None,
        })
        .collect();
    assert_eq!(binds, [ring, hwsp, image]);

    ce.unpin();
    assert_eq!(ce.pin_count(), 0);
    assert!(!ce.is_active());
    assert!(!bound(&ce));

    let unbinds: Vec<u32> = ggtt
        .trace()
        .iter()
        .filter_map(|e| match e {
            GttEvent::Unbind { handle, .. } => Some(*handle),
            GttEvent::Bind { .. } => None,
        })
        .collect();
    assert_eq!(unbinds, [image, hwsp, ring]);
    assert!(ce.flags().contains(inteld::ContextFlags::VALID));
}

#[test]
fn test_balanced_pins_leave_nothing_bound() {
    let dev = device();
    let ce = dev.create_context(dev.engine(0, "ccs0").unwrap());

    for n in 1..=16 {
        ce.pin().unwrap();
        assert_eq!(ce.pin_count(), n);
    }
    assert!(bound(&ce));

    for n in (0..16).rev() {
        ce.unpin();
        assert_eq!(ce.pin_count(), n);
    }
    assert!(!bound(&ce));
    assert!(!ce.is_active());
}

#[test]
fn test_engine_without_image() {
    let dev = device();
    let ce = dev.create_context(dev.engine(0, "bcs0").unwrap());

    ce.pin().unwrap();
    assert!(ce.image().is_none());
    assert!(ce.ring().unwrap().is_pinned());
    ce.unpin();
    assert!(!ce.ring().unwrap().is_pinned());
}

#[test]
fn test_concurrent_first_pins_bind_once() {
    const THREADS: usize = 8;

    let dev = device();
    let rcs = dev.engine(0, "rcs0").unwrap();
    let ggtt = Arc::clone(rcs.ggtt());
    let ce = dev.create_context(rcs);
    let binds = ggtt.bind_count();

    let barrier = Barrier::new(THREADS);
    thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                barrier.wait();
                ce.pin().unwrap();
            });
        }
    });

    assert_eq!(ce.pin_count(), THREADS as u32);
    assert_eq!(ggtt.bind_count() - binds, 3);

    let unbinds = ggtt.unbind_count();
    thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| ce.unpin());
        }
    });
    assert_eq!(ce.pin_count(), 0);
    assert_eq!(ggtt.unbind_count() - unbinds, 3);
}

#[test]
fn test_pin_is_not_blocked_by_unrelated_locked_object() {
    let dev = device();
    let rcs = dev.engine(0, "rcs0").unwrap();
    let c1 = dev.create_context(rcs);
    let c2 = dev.create_context(rcs);

    c1.alloc_state().unwrap();
    let held = c1.ring().unwrap().object().ww_mutex().try_lock().unwrap();

    let (tx, rx) = mpsc::channel();
    let other = Arc::clone(&c2);
    let worker = thread::spawn(move || {
        let _ = tx.send(other.pin());
    });

    let result = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("pin of an unrelated context stalled");
    assert_eq!(result, Ok(()));
    worker.join().unwrap();

    assert!(c2.is_pinned());
    assert!(!c1.is_pinned());
    drop(held);

    c1.pin().unwrap();
    c1.unpin();
    c2.unpin();
}

#[test]
fn test_interrupted_pin_unwinds() {
    let dev = device();
    let rcs = dev.engine(0, "rcs0").unwrap();
    let ggtt = Arc::clone(rcs.ggtt());
    let ce = dev.create_context(rcs);

    ce.alloc_state().unwrap();
    let held = ce.ring().unwrap().object().ww_mutex().try_lock().unwrap();
    let binds = ggtt.bind_count();

    let cancel = CancelToken::new();
    let worker = {
        let ce = Arc::clone(&ce);
        let cancel = cancel.clone();
        thread::spawn(move || ce.pin_interruptible(&cancel))
    };

    thread::sleep(Duration::from_millis(20));
    cancel.cancel();
    assert_eq!(worker.join().unwrap(), Err(Error::Interrupted));

    assert_eq!(ce.pin_count(), 0);
    assert!(!ce.is_active());
    assert!(!bound(&ce));
    assert_eq!(ggtt.bind_count(), binds);
    assert!(!ce.timeline().unwrap().hwsp_object().ww_mutex().is_locked());

    drop(held);
    ce.pin().unwrap();
    assert!(bound(&ce));
    ce.unpin();
}

#[test]
fn test_closed_and_banned_refuse_pins() {
    let dev = device();
    let rcs = dev.engine(0, "rcs0").unwrap();

    let closed = dev.create_context(rcs);
    closed.close();
    assert_eq!(closed.pin(), Err(Error::Closed));
    assert_eq!(closed.pin_count(), 0);

    let banned = dev.create_context(rcs);
    assert!(banned.ban());
    assert!(!banned.ban());
    assert_eq!(banned.pin(), Err(Error::Banned));
    assert_eq!(banned.alloc_state(), Err(Error::Banned));
}

#[test]
fn test_ring_size_fixed_after_alloc() {
    let dev = device();
    let ce = dev.create_context(dev.engine(0, "vcs0").unwrap());

    ce.set_ring_size(8192).unwrap();
    ce.alloc_state().unwrap();
    assert_eq!(ce.ring().unwrap().size(), 8192);
    assert_eq!(ce.set_ring_size(16384), Err(Error::Busy));
}

#[test]
fn test_preemption_timeout_nesting() {
    let dev = device();
    let ce = dev.create_context(dev.engine(0, "rcs0").unwrap());
    let default = ce.schedule_policy().preempt_timeout_ms;
    assert_eq!(default, 640);

    ce.disable_preemption_timeout();
    ce.disable_preemption_timeout();
    assert_eq!(ce.schedule_policy().preempt_timeout_ms, 0);

    ce.update_schedule_policy();
    assert_eq!(ce.schedule_policy().preempt_timeout_ms, 0);

    ce.reset_preemption_timeout();
    assert_eq!(ce.schedule_policy().preempt_timeout_ms, 0);
    ce.reset_preemption_timeout();
    assert_eq!(ce.schedule_policy().preempt_timeout_ms, default);

    // unbalanced reset is ignored
    ce.reset_preemption_timeout();
    assert_eq!(ce.schedule_policy().preempt_disable_count, 0);
}

#[test]
fn test_parent_child_binding() {
    let dev = device();
    let ccs = dev.engine(0, "ccs0").unwrap();
    let parent = dev.create_context(ccs);
    let c0 = dev.create_context(ccs);
    let c1 = dev.create_context(ccs);

    IntelContext::bind_parent_child(&parent, &c0).unwrap();
    IntelContext::bind_parent_child(&parent, &c1).unwrap();

    assert!(parent.is_parent());
    assert!(c1.is_child());
    assert_eq!(c1.child_index(), 1);
    assert!(Arc::ptr_eq(&c0.parent().unwrap(), &parent));
    assert_eq!(parent.children().len(), 2);

    assert!(IntelContext::bind_parent_child(&c0, &c1).is_err());
    assert!(IntelContext::bind_parent_child(&parent, &parent).is_err());

    let pinned = dev.create_context(ccs);
    pinned.pin().unwrap();
    assert_eq!(
        IntelContext::bind_parent_child(&parent, &pinned),
        Err(Error::Busy)
    );
    pinned.unpin();
}

#[test]
fn test_nopreempt_context_requests() {
    let dev = device();
    let rcs = dev.engine(0, "rcs0").unwrap();
    let ce = dev.create_context(rcs);

    let rq = ce.create_request().unwrap();
    assert!(rq.is_preemptible());

    ce.set_nopreempt();
    let pinned = ce.create_request().unwrap();
    assert!(!pinned.is_preemptible());
    // already queued requests keep what they were created with
    assert!(rq.is_preemptible());

    for rq in [&rq, &pinned] {
        rq.submit();
        rq.signal();
    }
    assert_eq!(ce.retire_requests(), 2);
}

#[test]
fn test_requests_keep_context_active_until_retired() {
    let dev = device();
    let rcs = dev.engine(0, "rcs0").unwrap();
    let ce = dev.create_context(rcs);

    ce.pin().unwrap();
    let rq = ce.create_request().unwrap();
    ce.unpin();

    // unpinned, but the request still holds the context active
    assert_eq!(ce.pin_count(), 0);
    assert!(ce.is_active());
    assert!(bound(&ce));
    assert!(rcs.is_awake());

    assert!(rq.submit());
    assert!(Arc::ptr_eq(&ce.find_active_request().unwrap(), &rq));
    assert_eq!(ce.retire_requests(), 0);

    rq.signal();
    assert!(rq.is_completed());
    assert_eq!(ce.retire_requests(), 1);
    assert!(rq.is_retired());
    drop(rq);

    assert!(!ce.is_active());
    assert!(!bound(&ce));
    assert!(!rcs.is_awake());
    assert_eq!(Arc::strong_count(&ce), 1);
}

#[test]
fn test_retire_async() {
    let dev = device();
    let ce = dev.create_context(dev.engine(0, "rcs0").unwrap());

    let rq = ce.create_request().unwrap();
    rq.submit();
    rq.signal();
    rq.retire_async(dev.workqueue());
    dev.workqueue().flush();

    assert!(rq.is_retired());
    assert!(!ce.is_active());
}
