//! Fixed-capacity instance pool
//!
//! Each slot carries its status in an atomic so `status` never waits on
//! the instance lock. Slot claims are serialized by a short critical
//! section; everything else about an instance is guarded by its own lock,
//! which is only ever tried, never waited on.

use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU16, AtomicU8, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::mutex::{Mutex, MutexGuard};

use crate::error::Error;
use crate::instance::Instance;
use crate::status::SessionStatus;

/// Opaque reference to an open session
///
/// A handle outlives its session harmlessly: once the session closes, the
/// slot generation moves on and every call with the old handle reports
/// `Error::InvalidHandle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Handle {
    index: u8,
    generation: u16,
}

impl Handle {
    /// Pool slot of the session
    pub fn index(self) -> usize {
        self.index as usize
    }

    pub fn generation(self) -> u16 {
        self.generation
    }
}

pub(crate) struct Slot<'a, Sock> {
    status: AtomicU8,
    generation: AtomicU16,
    instance: Mutex<CriticalSectionRawMutex, Instance<'a, Sock>>,
}

impl<'a, Sock> Slot<'a, Sock> {
    fn new() -> Self {
        Self {
            status: AtomicU8::new(SessionStatus::Idle as u8),
            generation: AtomicU16::new(0),
            instance: Mutex::new(Instance::vacant()),
        }
    }

    fn status(&self) -> SessionStatus {
        SessionStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, status: SessionStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    fn generation(&self) -> u16 {
        self.generation.load(Ordering::Acquire)
    }

    fn holds(&self, handle: Handle) -> bool {
        self.generation() == handle.generation && self.status() != SessionStatus::Idle
    }
}

/// Exclusive access to one instance
///
/// Dropping the guard publishes the instance status to the lock-free
/// status cell before releasing the lock. A vacated instance is not
/// published; the slot only turns `Idle` through [`Pool::free`].
pub(crate) struct Locked<'s, 'a, Sock> {
    guard: MutexGuard<'s, CriticalSectionRawMutex, Instance<'a, Sock>>,
    cell: &'s AtomicU8,
}

impl<'a, Sock> Deref for Locked<'_, 'a, Sock> {
    type Target = Instance<'a, Sock>;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<Sock> DerefMut for Locked<'_, '_, Sock> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl<Sock> Drop for Locked<'_, '_, Sock> {
    fn drop(&mut self) {
        if self.guard.status != SessionStatus::Idle {
            self.cell.store(self.guard.status as u8, Ordering::Release);
        }
    }
}

pub(crate) struct Pool<'a, Sock, const N: usize> {
    slots: [Slot<'a, Sock>; N],
    claims: BlockingMutex<CriticalSectionRawMutex, ()>,
}

impl<'a, Sock, const N: usize> Pool<'a, Sock, N> {
    /// Handles carry the slot index as a `u8`
    const INDEX_FITS: () = assert!(
        N <= u8::MAX as usize + 1,
        "session pool capacity exceeds 256 slots"
    );

    pub(crate) fn new() -> Self {
        let () = Self::INDEX_FITS;
        Self {
            slots: core::array::from_fn(|_| Slot::new()),
            claims: BlockingMutex::new(()),
        }
    }

    pub(crate) const fn capacity(&self) -> usize {
        N
    }

    /// Claim the first idle slot
    ///
    /// The slot leaves `Idle` immediately so no other caller can claim it;
    /// its instance is filled in by the caller under the instance lock.
    pub(crate) fn allocate(&self) -> Result<Handle, Error> {
        self.claims.lock(|_| {
            let (index, slot) = self
                .slots
                .iter()
                .enumerate()
                .find(|(_, slot)| slot.status() == SessionStatus::Idle)
                .ok_or(Error::Exhausted)?;
            slot.set_status(SessionStatus::LowerLayerDown);
            Ok(Handle {
                index: index as u8,
                generation: slot.generation(),
            })
        })
    }

    /// Return a slot to the pool, invalidating every handle to it
    pub(crate) fn free(&self, handle: Handle) {
        if let Some(slot) = self.slots.get(handle.index()) {
            self.claims.lock(|_| {
                if slot.generation() == handle.generation {
                    slot.generation.fetch_add(1, Ordering::AcqRel);
                    slot.set_status(SessionStatus::Idle);
                }
            });
        }
    }

    fn slot(&self, handle: Handle) -> Result<&Slot<'a, Sock>, Error> {
        match self.slots.get(handle.index()) {
            Some(slot) if slot.holds(handle) => Ok(slot),
            _ => Err(Error::InvalidHandle),
        }
    }

    /// Lock-free status read
    pub(crate) fn status(&self, handle: Handle) -> Result<SessionStatus, Error> {
        let slot = self.slot(handle)?;
        let status = slot.status();
        // the slot may have been freed between the two loads
        if slot.generation() != handle.generation || status == SessionStatus::Idle {
            return Err(Error::InvalidHandle);
        }
        Ok(status)
    }

    /// Try to lock an open session's instance
    pub(crate) fn lock(&self, handle: Handle) -> Result<Locked<'_, 'a, Sock>, Error> {
        let slot = self.slot(handle)?;
        let guard = slot
            .instance
            .try_lock()
            .map_err(|_| Error::LockOperationFailed)?;
        if !slot.holds(handle) || guard.status == SessionStatus::Idle {
            return Err(Error::InvalidHandle);
        }
        Ok(Locked {
            guard,
            cell: &slot.status,
        })
    }

    /// Lock a freshly allocated slot, whose instance is still vacant
    ///
    /// Retries up to `attempts` times; the previous owner may still be
    /// finishing its close.
    pub(crate) fn lock_claimed(
        &self,
        handle: Handle,
        attempts: usize,
    ) -> Result<Locked<'_, 'a, Sock>, Error> {
        let slot = self.slot(handle)?;
        for _ in 0..attempts {
            if let Ok(guard) = slot.instance.try_lock() {
                return Ok(Locked {
                    guard,
                    cell: &slot.status,
                });
            }
            core::hint::spin_loop();
        }
        Err(Error::LockOperationFailed)
    }

    /// Handle of the session occupying slot `index`, if any
    pub(crate) fn handle_at(&self, index: usize) -> Option<Handle> {
        let slot = self.slots.get(index)?;
        let handle = Handle {
            index: index as u8,
            generation: slot.generation(),
        };
        slot.holds(handle).then_some(handle)
    }

    pub(crate) fn in_use(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.status() != SessionStatus::Idle)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;

    type TestPool = Pool<'static, u8, 2>;

    fn open(pool: &TestPool) -> Handle {
        let handle = pool.allocate().unwrap();
        let mut locked = pool.lock_claimed(handle, 1).unwrap();
        *locked = Instance::new(SessionConfig::default(), None);
        handle
    }

    #[test]
    fn test_allocate_until_exhausted() {
        let pool = TestPool::new();
        assert_eq!(pool.capacity(), 2);

        let first = open(&pool);
        let second = open(&pool);
        assert_ne!(first.index(), second.index());
        assert_eq!(pool.in_use(), 2);
        assert_eq!(pool.allocate(), Err(Error::Exhausted));
    }

    #[test]
    fn test_free_invalidates_handle() {
        let pool = TestPool::new();
        let handle = open(&pool);
        assert_eq!(pool.status(handle), Ok(SessionStatus::LowerLayerDown));

        {
            let mut locked = pool.lock(handle).unwrap();
            *locked = Instance::vacant();
        }
        // vacated but not yet freed
        assert!(matches!(pool.lock(handle), Err(Error::InvalidHandle)));
        pool.free(handle);
        assert_eq!(pool.status(handle), Err(Error::InvalidHandle));
        assert!(matches!(pool.lock(handle), Err(Error::InvalidHandle)));

        let reused = open(&pool);
        assert_eq!(reused.index(), handle.index());
        assert_ne!(reused.generation(), handle.generation());
        assert_eq!(pool.status(handle), Err(Error::InvalidHandle));
        assert!(pool.status(reused).is_ok());
    }

    #[test]
    fn test_lock_is_exclusive() {
        let pool = TestPool::new();
        let handle = open(&pool);

        let held = pool.lock(handle).unwrap();
        assert!(matches!(pool.lock(handle), Err(Error::LockOperationFailed)));
        // status stays readable while the lock is held
        assert_eq!(pool.status(handle), Ok(SessionStatus::LowerLayerDown));
        drop(held);
        assert!(pool.lock(handle).is_ok());
    }

    #[test]
    fn test_guard_publishes_status() {
        let pool = TestPool::new();
        let handle = open(&pool);
        {
            let mut locked = pool.lock(handle).unwrap();
            locked.status = SessionStatus::ResolvingDns;
        }
        assert_eq!(pool.status(handle), Ok(SessionStatus::ResolvingDns));
    }

    #[test]
    fn test_largest_pool_addresses_every_slot() {
        let pool: Pool<'static, u8, 256> = Pool::new();
        let handles: std::vec::Vec<Handle> = (0..256)
            .map(|_| {
                let handle = pool.allocate().unwrap();
                let mut locked = pool.lock_claimed(handle, 1).unwrap();
                *locked = Instance::new(SessionConfig::default(), None);
                handle
            })
            .collect();
        assert_eq!(pool.allocate(), Err(Error::Exhausted));

        let last = handles[255];
        assert_eq!(last.index(), 255);
        assert_eq!(pool.handle_at(255), Some(last));
        pool.free(handles[0]);
        assert_eq!(pool.status(last), Ok(SessionStatus::LowerLayerDown));
        assert_eq!(pool.handle_at(0), None);
    }

    #[test]
    fn test_handle_at() {
        let pool = TestPool::new();
        assert_eq!(pool.handle_at(0), None);
        let handle = open(&pool);
        assert_eq!(pool.handle_at(handle.index()), Some(handle));
        assert_eq!(pool.handle_at(5), None);
    }
}
