// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Wound-wait multi-object locking
//!
//! A transaction ([`WwAcquireCtx`]) locks any number of objects in any
//! order. Each transaction carries an age stamp taken when it starts:
//!
//! * an older transaction that finds a lock held by a younger one *wounds*
//!   the holder and waits for it;
//! * a wounded transaction that holds locks gets [`Error::Deadlock`] from its
//!   next lock attempt (or while waiting), must call
//!   [`WwAcquireCtx::backoff`], which drops everything and sleeps on the
//!   contended lock, then restarts its work.
//!
//! The stamp is kept across backoffs, so a retrying transaction only gets
//! older relative to newcomers and eventually wins every conflict.
//!
//! ```text
//!   ww_transaction(|ww| {        loop {
//!       ww.lock(&a)?;                f(ww) == Err(Deadlock) → ww.backoff()?
//!       ww.lock(&b)?;                otherwise → unlock all, return
//!       ...                      }
//!   })
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};

/// Wait slice while blocked on a lock; wound and cancel flags are
/// re-checked after every slice.
const WAIT_SLICE: Duration = Duration::from_millis(1);

static STAMP: AtomicU64 = AtomicU64::new(1);

/// Cooperative interruption for blocking lock waits.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

struct Transaction {
    stamp: u64,
    wounded: AtomicBool,
}

enum Owner {
    Tx(Arc<Transaction>),
    /// Locked without a transaction (trylock).
    Anonymous,
}

pub struct WwMutex {
    owner: Mutex<Option<Owner>>,
    released: Condvar,
}

impl Default for WwMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl WwMutex {
    pub fn new() -> Self {
        Self {
            owner: Mutex::new(None),
            released: Condvar::new(),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.owner.lock().is_some()
    }

    /// Lock without a transaction, failing with `Busy` if held.
    pub fn try_lock(&self) -> Result<WwGuard<'_>> {
        let mut owner = self.owner.lock();
        if owner.is_some() {
            return Err(Error::Busy);
        }
        *owner = Some(Owner::Anonymous);
        Ok(WwGuard(self))
    }

    fn unlock(&self) {
        *self.owner.lock() = None;
        self.released.notify_all();
    }
}

/// Lock taken with [`WwMutex::try_lock`].
pub struct WwGuard<'a>(&'a WwMutex);

impl Drop for WwGuard<'_> {
    fn drop(&mut self) {
        self.0.unlock();
    }
}

/// Objects that can take part in a wound-wait transaction.
pub trait WwLockable: Send + Sync {
    fn ww_mutex(&self) -> &WwMutex;
}

fn same_lock(a: &dyn WwLockable, b: &dyn WwLockable) -> bool {
    std::ptr::eq(a.ww_mutex(), b.ww_mutex())
}

pub struct WwAcquireCtx {
    tx: Arc<Transaction>,
    held: Vec<Arc<dyn WwLockable>>,
    contended: Option<Arc<dyn WwLockable>>,
    cancel: Option<CancelToken>,
    backoffs: u32,
}

impl WwAcquireCtx {
    /// Start a transaction. Waits are interruptible if `cancel` is given.
    pub fn new(cancel: Option<CancelToken>) -> Self {
        Self {
            tx: Arc::new(Transaction {
                stamp: STAMP.fetch_add(1, Ordering::Relaxed),
                wounded: AtomicBool::new(false),
            }),
            held: Vec::new(),
            contended: None,
            cancel,
            backoffs: 0,
        }
    }

    pub fn stamp(&self) -> u64 {
        self.tx.stamp
    }

    pub fn cancel_token(&self) -> Option<&CancelToken> {
        self.cancel.as_ref()
    }

    /// Number of times this transaction had to back off.
    pub fn backoffs(&self) -> u32 {
        self.backoffs
    }

    pub fn held(&self) -> usize {
        self.held.len()
    }

    /// Lock `obj` as part of this transaction. Locking an object the
    /// transaction already holds succeeds.
    pub fn lock<T: WwLockable + 'static>(&mut self, obj: &Arc<T>) -> Result<()> {
        let obj: Arc<dyn WwLockable> = Arc::clone(obj) as Arc<dyn WwLockable>;
        self.lock_inner(obj)
    }

    pub fn is_locked(&self, obj: &dyn WwLockable) -> bool {
        self.held.iter().any(|h| same_lock(h.as_ref(), obj))
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| c.is_cancelled())
    }

    fn lock_inner(&mut self, obj: Arc<dyn WwLockable>) -> Result<()> {
        if self.held.is_empty() {
            self.tx.wounded.store(false, Ordering::Release);
        }

        let mutex = obj.ww_mutex();
        let mut owner = mutex.owner.lock();
        loop {
            match owner.as_ref() {
                None => {
                    *owner = Some(Owner::Tx(Arc::clone(&self.tx)));
                    break;
                }
                Some(Owner::Tx(holder)) if Arc::ptr_eq(holder, &self.tx) => return Ok(()),
                Some(Owner::Tx(holder)) => {
                    if holder.stamp > self.tx.stamp {
                        holder.wounded.store(true, Ordering::Release);
                    }
                }
                Some(Owner::Anonymous) => {}
            }

            if !self.held.is_empty() && self.tx.wounded.load(Ordering::Acquire) {
                drop(owner);
                self.contended = Some(obj);
                return Err(Error::Deadlock);
            }

            if self.is_cancelled() {
                return Err(Error::Interrupted);
            }

            mutex.released.wait_for(&mut owner, WAIT_SLICE);
        }
        drop(owner);

        self.held.push(obj);
        Ok(())
    }

    /// Drop a single lock before the transaction ends.
    pub fn unlock_single(&mut self, obj: &dyn WwLockable) {
        if let Some(pos) = self.held.iter().position(|h| same_lock(h.as_ref(), obj)) {
            let held = self.held.swap_remove(pos);
            held.ww_mutex().unlock();
        }
    }

    fn unlock_all(&mut self) {
        for obj in self.held.drain(..).rev() {
            obj.ww_mutex().unlock();
        }
    }

    /// Release everything, then sleep until the contended lock is ours.
    pub fn backoff(&mut self) -> Result<()> {
        let obj = self
            .contended
            .take()
            .ok_or(Error::InvalidArgument("backoff without contended lock"))?;

        self.unlock_all();
        self.backoffs += 1;

        // Holding nothing, so this cannot be wounded into another backoff.
        self.lock_inner(obj)
    }

    /// End the transaction, releasing every lock.
    pub fn fini(self) {}
}

impl Drop for WwAcquireCtx {
    fn drop(&mut self) {
        if self.contended.take().is_some() {
            log::warn!("inteld: ww transaction {} ended while contended", self.tx.stamp);
        }
        self.unlock_all();
    }
}

/// Run `f` in a transaction, backing off and retrying on deadlock.
pub fn ww_transaction<T>(
    cancel: Option<&CancelToken>,
    mut f: impl FnMut(&mut WwAcquireCtx) -> Result<T>,
) -> Result<T> {
    let mut ww = WwAcquireCtx::new(cancel.cloned());
    loop {
        match f(&mut ww) {
            Err(Error::Deadlock) => ww.backoff()?,
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    #[derive(Default)]
    struct Obj {
        lock: WwMutex,
    }

    impl WwLockable for Obj {
        fn ww_mutex(&self) -> &WwMutex {
            &self.lock
        }
    }

    #[test]
    fn test_lock_twice_is_ok() {
        let a = Arc::new(Obj::default());
        let mut ww = WwAcquireCtx::new(None);
        ww.lock(&a).unwrap();
        ww.lock(&a).unwrap();
        assert_eq!(ww.held(), 1);
        assert!(ww.is_locked(a.as_ref()));
        ww.fini();
        assert!(!a.lock.is_locked());
    }

    #[test]
    fn test_try_lock_busy() {
        let a = Arc::new(Obj::default());
        let mut ww = WwAcquireCtx::new(None);
        ww.lock(&a).unwrap();
        assert_eq!(a.lock.try_lock().err(), Some(Error::Busy));
        ww.unlock_single(a.as_ref());
        let guard = a.lock.try_lock().unwrap();
        assert!(a.lock.is_locked());
        drop(guard);
        assert!(!a.lock.is_locked());
    }

    #[test]
    fn test_cancelled_wait() {
        let a = Arc::new(Obj::default());
        let _guard = a.lock.try_lock().unwrap();

        let token = CancelToken::new();
        token.cancel();
        let mut ww = WwAcquireCtx::new(Some(token));
        assert_eq!(ww.lock(&a), Err(Error::Interrupted));
        assert_eq!(ww.held(), 0);
    }

    #[test]
    fn test_older_wounds_younger() {
        let a = Arc::new(Obj::default());
        let b = Arc::new(Obj::default());

        let mut old = WwAcquireCtx::new(None);
        let mut young = WwAcquireCtx::new(None);
        assert!(old.stamp() < young.stamp());

        old.lock(&a).unwrap();
        young.lock(&b).unwrap();

        let (tx, rx) = mpsc::channel();
        let b_clone = Arc::clone(&b);
        let handle = thread::spawn(move || {
            // blocks until the younger transaction backs off
            old.lock(&b_clone).unwrap();
            tx.send(old.held()).unwrap();
        });

        // wait until we have been wounded, then our next lock must fail
        let mut result = Ok(());
        for _ in 0..1000 {
            if young.tx.wounded.load(Ordering::Acquire) {
                result = young.lock(&a);
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(result, Err(Error::Deadlock));

        // backoff releases b and sleeps on a until the old transaction ends
        let b_released = thread::spawn(move || {
            young.backoff().unwrap();
            young.held()
        });
        assert_eq!(rx.recv().unwrap(), 2);
        handle.join().unwrap();
        assert_eq!(b_released.join().unwrap(), 1);
    }

    #[test]
    fn test_abba_transactions_complete() {
        let a = Arc::new(Obj::default());
        let b = Arc::new(Obj::default());

        let mut handles = Vec::new();
        for i in 0..4 {
            let (first, second) = if i % 2 == 0 {
                (Arc::clone(&a), Arc::clone(&b))
            } else {
                (Arc::clone(&b), Arc::clone(&a))
            };
            handles.push(thread::spawn(move || {
                for _ in 0..200 {
                    ww_transaction(None, |ww| {
                        ww.lock(&first)?;
                        thread::yield_now();
                        ww.lock(&second)?;
                        Ok(())
                    })
                    .unwrap();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(!a.lock.is_locked());
        assert!(!b.lock.is_locked());
    }

    #[test]
    fn test_backoff_keeps_contended_lock() {
        let a = Arc::new(Obj::default());
        let b = Arc::new(Obj::default());

        let mut ww = WwAcquireCtx::new(None);
        ww.lock(&a).unwrap();
        ww.contended = Some(Arc::clone(&b) as Arc<dyn WwLockable>);
        ww.backoff().unwrap();
        assert_eq!(ww.held(), 1);
        assert!(b.lock.is_locked());
        assert!(!a.lock.is_locked());
        assert_eq!(ww.backoffs(), 1);
    }

    #[test]
    fn test_backoff_without_contention() {
        let mut ww = WwAcquireCtx::new(None);
        assert!(matches!(ww.backoff(), Err(Error::InvalidArgument(_))));
    }
}
