use crate::CoreError;
use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Instant;
use stratus_schema::ScopeKey;
use tracing::{debug, trace};

#[derive(Default)]
struct Slot {
    held: Mutex<bool>,
    released: Condvar,
}

thread_local! {
    /// Scope held by the current thread, if any. A logical operation runs on
    /// one thread, so this forbids nested acquisition within it.
    static HELD: RefCell<Option<ScopeKey>> = const { RefCell::new(None) };
}

/// Serializes mutations that touch a shared parent object.
///
/// One coordinator is created per process and passed to every reconciliation.
/// For a given scope key at most one holder exists at a time; different scopes
/// never contend. A scope's slot lives only while someone holds or waits for
/// it.
#[derive(Default)]
pub struct LockCoordinator {
    slots: Mutex<HashMap<ScopeKey, Arc<Slot>>>,
}

/// Exclusive access to one scope. Released on drop, including during unwinding.
///
/// Tied to the acquiring thread.
pub struct LockToken<'a> {
    coordinator: &'a LockCoordinator,
    slot: Arc<Slot>,
    scope: ScopeKey,
    _not_send: PhantomData<*const ()>,
}

impl LockToken<'_> {
    pub fn scope(&self) -> &ScopeKey {
        &self.scope
    }
}

impl Drop for LockToken<'_> {
    fn drop(&mut self) {
        {
            let mut held = self.slot.held.lock().unwrap_or_else(PoisonError::into_inner);
            *held = false;
        }
        self.slot.released.notify_one();
        HELD.with(|h| h.borrow_mut().take());
        self.coordinator.forget_idle(&self.scope, &self.slot);
        trace!("released lock on {}", self.scope);
    }
}

impl LockCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, scope: &ScopeKey) -> Arc<Slot> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(scope.clone()).or_default())
    }

    /// Drop the slot of `scope` if the map and the caller are its only owners.
    /// Waiters hold a clone, and new clones are only taken under the map lock.
    fn forget_idle(&self, scope: &ScopeKey, slot: &Arc<Slot>) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let idle = slots
            .get(scope)
            .is_some_and(|s| Arc::ptr_eq(s, slot) && Arc::strong_count(slot) == 2);
        if idle {
            slots.remove(scope);
        }
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn check_not_nested(scope: &ScopeKey) -> Result<(), CoreError> {
        HELD.with(|h| match &*h.borrow() {
            Some(held) => Err(CoreError::NestedLock {
                held: held.clone(),
                requested: scope.clone(),
            }),
            None => Ok(()),
        })
    }

    fn token(&self, slot: Arc<Slot>, scope: &ScopeKey) -> LockToken<'_> {
        HELD.with(|h| *h.borrow_mut() = Some(scope.clone()));
        debug!("acquired lock on {scope}");
        LockToken {
            coordinator: self,
            slot,
            scope: scope.clone(),
            _not_send: PhantomData,
        }
    }

    /// Block until `scope` is free.
    pub fn acquire(&self, scope: &ScopeKey) -> Result<LockToken<'_>, CoreError> {
        Self::check_not_nested(scope)?;
        let slot = self.slot(scope);
        {
            let mut held = slot.held.lock().unwrap_or_else(PoisonError::into_inner);
            while *held {
                held = slot
                    .released
                    .wait(held)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            *held = true;
        }
        Ok(self.token(slot, scope))
    }

    /// Block until `scope` is free or `deadline` passes.
    pub fn acquire_until(
        &self,
        scope: &ScopeKey,
        deadline: Instant,
    ) -> Result<LockToken<'_>, CoreError> {
        Self::check_not_nested(scope)?;
        let slot = self.slot(scope);
        {
            let mut held = slot.held.lock().unwrap_or_else(PoisonError::into_inner);
            while *held {
                let now = Instant::now();
                if now >= deadline {
                    drop(held);
                    self.forget_idle(scope, &slot);
                    return Err(CoreError::LockTimeout {
                        scope: scope.clone(),
                    });
                }
                let (guard, _) = slot
                    .released
                    .wait_timeout(held, deadline - now)
                    .unwrap_or_else(PoisonError::into_inner);
                held = guard;
            }
            *held = true;
        }
        Ok(self.token(slot, scope))
    }

    /// Run `f` while holding `scope`.
    pub fn with_lock<T>(
        &self,
        scope: &ScopeKey,
        f: impl FnOnce() -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        let _token = self.acquire(scope)?;
        f()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn same_scope_is_mutually_exclusive() {
        let coordinator = LockCoordinator::new();
        let scope = ScopeKey::new("edge_gateway:urn:gw:1");
        let inside = AtomicUsize::new(0);
        let max_inside = AtomicUsize::new(0);
        let barrier = Barrier::new(8);

        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    barrier.wait();
                    coordinator
                        .with_lock(&scope, || {
                            let n = inside.fetch_add(1, Ordering::SeqCst) + 1;
                            max_inside.fetch_max(n, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(5));
                            inside.fetch_sub(1, Ordering::SeqCst);
                            Ok(())
                        })
                        .unwrap();
                });
            }
        });
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn different_scopes_run_in_parallel() {
        let coordinator = LockCoordinator::new();
        let barrier = Barrier::new(2);
        thread::scope(|s| {
            for i in 0..2 {
                let coordinator = &coordinator;
                let barrier = &barrier;
                s.spawn(move || {
                    let scope = ScopeKey::new(format!("vdc:{i}"));
                    coordinator
                        .with_lock(&scope, || {
                            // Both holders must be inside at once to pass.
                            barrier.wait();
                            Ok(())
                        })
                        .unwrap();
                });
            }
        });
    }

    #[test]
    fn nested_acquisition_rejected() {
        let coordinator = LockCoordinator::new();
        let a = ScopeKey::new("vdc:a");
        let b = ScopeKey::new("vdc:b");
        let _token = coordinator.acquire(&a).unwrap();
        let err = coordinator.acquire(&b).err().unwrap();
        assert!(matches!(err, CoreError::NestedLock { .. }));
    }

    #[test]
    fn released_on_error_and_panic() {
        let coordinator = LockCoordinator::new();
        let scope = ScopeKey::new("vapp:1");
        let r: Result<(), CoreError> =
            coordinator.with_lock(&scope, || Err(CoreError::NotFound("x".to_owned())));
        assert!(r.is_err());

        let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _t = coordinator.acquire(&scope).unwrap();
            panic!("boom");
        }));
        assert!(caught.is_err());

        let deadline = Instant::now() + Duration::from_millis(100);
        assert!(coordinator.acquire_until(&scope, deadline).is_ok());
    }

    #[test]
    fn released_scopes_are_forgotten() {
        let coordinator = LockCoordinator::new();
        for i in 0..16 {
            let scope = ScopeKey::new(format!("vdc:{i}"));
            coordinator.with_lock(&scope, || Ok(())).unwrap();
        }
        assert_eq!(coordinator.slot_count(), 0);

        let scope = ScopeKey::new("vdc:held");
        let token = coordinator.acquire(&scope).unwrap();
        assert_eq!(coordinator.slot_count(), 1);
        drop(token);
        assert_eq!(coordinator.slot_count(), 0);
    }

    #[test]
    fn acquire_until_times_out() {
        let coordinator = LockCoordinator::new();
        let scope = ScopeKey::new("edge_gateway:gw");
        thread::scope(|s| {
            let _held = coordinator.acquire(&scope).unwrap();
            s.spawn(|| {
                let deadline = Instant::now() + Duration::from_millis(20);
                let err = coordinator.acquire_until(&scope, deadline).err().unwrap();
                assert!(matches!(err, CoreError::LockTimeout { .. }));
            })
            .join()
            .unwrap();
        });
        assert_eq!(coordinator.slot_count(), 0);
    }
}
