//! Internal synchronization state for [`LazyProvider`](crate::LazyProvider).
//!
//! The provider's lifecycle is packed into a single `AtomicU8` and driven with
//! atomic operations, with futex-based waiting via `parking_lot_core` when a
//! caller has to block behind an in-flight construction.
//!
//! Layout of the state word:
//! - Bit 0: DONE - the instance is constructed and published
//! - Bit 1: LOCKED - a caller holds the initialization guard
//! - Bit 2: WAITING - at least one thread is parked on the state word
//! - Bits 3-7: EPOCH - generation counter bumped on every publish or reset
//!
//! Alongside the state word, the lock records an owner token identifying the
//! thread that holds the guard. A blocking caller that finds the guard held by
//! its own thread is re-entering the provider from inside its constructor, and
//! gets [`Reentrant`] back instead of parking forever.

use core::fmt;
use core::mem;
use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use parking_lot_core::{DEFAULT_PARK_TOKEN, DEFAULT_UNPARK_TOKEN};

/// Observable phase of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderState {
   /// Nothing constructed yet, and nobody is constructing.
   Uninitialized,
   /// A caller holds the guard and is running the constructor.
   Initializing,
   /// The instance is published; every `get` returns it.
   Ready,
}

impl fmt::Display for ProviderState {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(match self {
         Self::Uninitialized => "uninitialized",
         Self::Initializing => "initializing",
         Self::Ready => "ready",
      })
   }
}

/// Returned by [`InitLock::lock`] when the calling thread already holds the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Reentrant;

/// Source of owner tokens. Zero is reserved for "no owner".
static NEXT_OWNER_TOKEN: AtomicUsize = AtomicUsize::new(1);

std::thread_local! {
   static OWNER_TOKEN: usize = NEXT_OWNER_TOKEN.fetch_add(1, Ordering::Relaxed);
}

/// Nonzero token unique to the calling thread.
#[inline]
fn owner_token() -> usize {
   OWNER_TOKEN.with(|token| *token)
}

/// Atomic state and guard bookkeeping for one provider.
pub(crate) struct InitLock {
   state: AtomicU8,
   owner: AtomicUsize,
}

impl InitLock {
   /// Bit flag: instance is published.
   const DONE: u8 = 1;
   /// Bit flag: guard is held.
   const LOCKED: u8 = 2;
   /// Bit flag: at least one thread is parked.
   const WAITING: u8 = 4;
   /// Lowest epoch bit.
   const EPOCH_1: u8 = 8;
   /// Mask for epoch bits.
   const EPOCH_MASK: u8 = !(Self::DONE | Self::LOCKED | Self::WAITING);

   /// No thread holds the guard.
   const NO_OWNER: usize = 0;

   #[inline(always)]
   const fn next_epoch(current_state: u8) -> u8 {
      (current_state & Self::EPOCH_MASK).wrapping_add(Self::EPOCH_1) & Self::EPOCH_MASK
   }

   /// Creates the state of an uninitialized provider.
   #[inline]
   pub(crate) const fn new() -> Self {
      Self {
         state: AtomicU8::new(0),
         owner: AtomicUsize::new(Self::NO_OWNER),
      }
   }

   /// Address used as the futex key for park/unpark.
   #[inline(always)]
   fn key(&self) -> usize {
      self.state.as_ptr() as usize
   }

   /// Wakes every parked thread.
   #[inline]
   fn notify_all(&self) {
      // SAFETY: park and unpark use the same key, the address of the state word.
      unsafe {
         parking_lot_core::unpark_all(self.key(), DEFAULT_UNPARK_TOKEN);
      }
   }

   /// Parks the calling thread until the state word moves away from `expected_state`.
   #[inline]
   fn wait(&self, expected_state: u8) {
      // SAFETY: see `notify_all`.
      unsafe {
         // The validate closure runs under the bucket lock, so a concurrent
         // notify cannot slip in between the check and the sleep.
         let _ = parking_lot_core::park(
            self.key(),
            || self.state.load(Ordering::Acquire) == expected_state,
            || {},
            |_, _| {},
            DEFAULT_PARK_TOKEN,
            None,
         );
         // Spurious wakeups are fine, callers loop and re-check.
      }
   }

   /// Publishes DONE with a fresh epoch and wakes waiters.
   ///
   /// Returns `true` if the state was not previously DONE. Only the guard holder calls this.
   #[inline]
   fn set_done(&self) -> bool {
      let current_state = self.state.load(Ordering::Relaxed);
      let new_state = Self::DONE | Self::next_epoch(current_state);

      // Release pairs with the Acquire loads in `is_done` and `lock_step`: the
      // instance written before this swap is visible to anyone who sees DONE.
      let prev_state = self.state.swap(new_state, Ordering::Release);
      if prev_state & Self::WAITING != 0 {
         self.notify_all();
      }
      prev_state & Self::DONE == 0
   }

   /// Clears DONE and LOCKED with a fresh epoch and wakes waiters so one of them can retry.
   ///
   /// Only the guard holder calls this, on a failed or abandoned construction.
   #[inline]
   fn reset(&self) {
      let current_state = self.state.load(Ordering::Relaxed);
      let prev_state = self
         .state
         .swap(Self::next_epoch(current_state), Ordering::Release);
      if prev_state & Self::WAITING != 0 {
         self.notify_all();
      }
   }

   /// Checks the DONE flag.
   #[inline]
   pub(crate) fn is_done(&self, ordering: Ordering) -> bool {
      self.state.load(ordering) & Self::DONE != 0
   }

   /// Snapshot of the provider phase.
   #[inline]
   pub(crate) fn phase(&self) -> ProviderState {
      let state = self.state.load(Ordering::Acquire);
      if state & Self::DONE != 0 {
         ProviderState::Ready
      } else if state & Self::LOCKED != 0 {
         ProviderState::Initializing
      } else {
         ProviderState::Uninitialized
      }
   }

   /// One attempt at taking the guard.
   ///
   /// - `Ok(None)`: already DONE.
   /// - `Ok(Some(guard))`: guard acquired.
   /// - `Err(state)`: guard held elsewhere; `state` has WAITING set.
   #[inline]
   fn lock_step(&self) -> Result<Option<InitGuard<'_>>, u8> {
      loop {
         let current_state = self.state.load(Ordering::Acquire);
         if current_state & Self::DONE != 0 {
            return Ok(None);
         }

         if current_state & Self::LOCKED == 0 {
            match self.state.compare_exchange_weak(
               current_state,
               current_state | Self::LOCKED,
               Ordering::Acquire,
               Ordering::Relaxed,
            ) {
               Ok(_) => return Ok(Some(InitGuard::new(self))),
               Err(_) => {
                  std::hint::spin_loop();
                  continue;
               }
            }
         }

         if current_state & Self::WAITING == 0 {
            let new_state = current_state | Self::WAITING;
            match self.state.compare_exchange_weak(
               current_state,
               new_state,
               Ordering::Relaxed,
               Ordering::Relaxed,
            ) {
               Ok(_) => return Err(new_state),
               Err(_) => {
                  // The holder may have finished in between, look again.
                  std::hint::spin_loop();
                  continue;
               }
            }
         }
         return Err(current_state);
      }
   }

   /// Takes the guard, parking while another thread holds it.
   ///
   /// Returns `Ok(None)` if the provider became DONE before the guard was free,
   /// and `Err(Reentrant)` if the guard is held by the calling thread.
   #[inline]
   pub(crate) fn lock(&self) -> Result<Option<InitGuard<'_>>, Reentrant> {
      let token = owner_token();
      let mut observed = match self.lock_step() {
         Ok(guard) => return Ok(guard.map(|guard| guard.owned_by(token))),
         Err(state) => state,
      };
      loop {
         // Only this thread ever stores its own token, so a Relaxed load that
         // reads it back is never stale.
         if self.owner.load(Ordering::Relaxed) == token {
            return Err(Reentrant);
         }
         self.wait(observed);
         match self.lock_step() {
            Ok(guard) => return Ok(guard.map(|guard| guard.owned_by(token))),
            Err(state) => observed = state,
         }
      }
   }

   /// Takes the guard from async code.
   ///
   /// Spins and yields to the runtime first. On the multi-thread runtime a task
   /// that still finds the guard held falls back to `block_in_place`; on any other
   /// runtime it keeps yielding, since blocking there would stall the constructing
   /// task. The guard carries no owner token: a task can migrate between threads,
   /// so async re-entrancy is tracked per task instead.
   #[cfg(any(feature = "async-tokio", feature = "async-tokio-mt"))]
   #[inline]
   pub(crate) async fn lock_async(&self) -> Option<InitGuard<'_>> {
      loop {
         for _ in 0..16 {
            match self.lock_step() {
               Ok(guard) => return guard,
               Err(state) => {
                  for _ in 0..32 {
                     tokio::task::yield_now().await;
                     if self.state.load(Ordering::Relaxed) != state {
                        break;
                     }
                  }
               }
            }
         }

         #[cfg(feature = "async-tokio-mt")]
         {
            if can_block_in_place() {
               return match self.lock_step() {
                  Ok(guard) => guard,
                  Err(state) => tokio::task::block_in_place(|| {
                     self.wait(state);
                     loop {
                        match self.lock_step() {
                           Ok(guard) => break guard,
                           Err(state) => self.wait(state),
                        }
                     }
                  }),
               };
            }
         }
      }
   }
}

/// Whether the calling task may park its worker thread.
///
/// `block_in_place` panics on a current-thread runtime.
#[cfg(feature = "async-tokio-mt")]
#[inline]
fn can_block_in_place() -> bool {
   use tokio::runtime::{Handle, RuntimeFlavor};

   matches!(
      Handle::try_current().map(|handle| handle.runtime_flavor()),
      Ok(RuntimeFlavor::MultiThread)
   )
}

/// RAII guard over a provider's construction.
///
/// Dropping it resets the provider to uninitialized and wakes waiters, which is
/// what happens when the constructor fails, panics, or its future is dropped.
/// [`commit`](Self::commit) publishes DONE instead.
pub(crate) struct InitGuard<'a> {
   lock: &'a InitLock,
}

impl<'a> InitGuard<'a> {
   /// Assumes LOCKED is already set on `lock`.
   #[inline(always)]
   const fn new(lock: &'a InitLock) -> Self {
      Self { lock }
   }

   /// Records the calling thread as the guard holder.
   #[inline(always)]
   fn owned_by(self, token: usize) -> Self {
      self.lock.owner.store(token, Ordering::Relaxed);
      self
   }

   /// Publishes DONE and consumes the guard.
   #[inline(always)]
   pub(crate) fn commit(self) -> bool {
      self.lock.owner.store(InitLock::NO_OWNER, Ordering::Relaxed);
      let published = self.lock.set_done();
      mem::forget(self);
      published
   }
}

impl Drop for InitGuard<'_> {
   #[inline(always)]
   fn drop(&mut self) {
      self.lock.owner.store(InitLock::NO_OWNER, Ordering::Relaxed);
      self.lock.reset();
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn fresh_lock_is_uninitialized() {
      let lock = InitLock::new();
      assert_eq!(lock.phase(), ProviderState::Uninitialized);
      assert!(!lock.is_done(Ordering::Acquire));
   }

   #[test]
   fn held_guard_reports_initializing() {
      let lock = InitLock::new();
      let guard = lock.lock().unwrap().expect("fresh lock must hand out a guard");
      assert_eq!(lock.phase(), ProviderState::Initializing);
      drop(guard);
      assert_eq!(lock.phase(), ProviderState::Uninitialized);
   }

   #[test]
   fn commit_publishes_ready() {
      let lock = InitLock::new();
      let guard = lock.lock().unwrap().unwrap();
      assert!(guard.commit());
      assert_eq!(lock.phase(), ProviderState::Ready);
      assert!(lock.is_done(Ordering::Acquire));
      // Once DONE, nobody gets a guard again.
      assert!(matches!(lock.lock(), Ok(None)));
   }

   #[test]
   fn same_thread_relock_is_reentrant() {
      let lock = InitLock::new();
      let guard = lock.lock().unwrap().unwrap();
      assert_eq!(lock.lock().err(), Some(Reentrant));
      // The failed attempt must not disturb the holder.
      assert_eq!(lock.phase(), ProviderState::Initializing);
      assert!(guard.commit());
      assert_eq!(lock.phase(), ProviderState::Ready);
   }

   #[test]
   fn dropped_guard_clears_owner() {
      let lock = InitLock::new();
      drop(lock.lock().unwrap().unwrap());
      assert_eq!(lock.owner.load(Ordering::Relaxed), InitLock::NO_OWNER);
      // A second attempt from the same thread is a retry, not re-entrancy.
      assert!(matches!(lock.lock(), Ok(Some(_))));
   }

   #[test]
   fn reset_advances_epoch() {
      let lock = InitLock::new();
      let before = lock.state.load(Ordering::Relaxed) & InitLock::EPOCH_MASK;
      drop(lock.lock().unwrap().unwrap());
      let after = lock.state.load(Ordering::Relaxed) & InitLock::EPOCH_MASK;
      assert_eq!(after, InitLock::next_epoch(before));
   }

   #[test]
   fn other_thread_waits_for_commit() {
      let lock = InitLock::new();
      let guard = lock.lock().unwrap().unwrap();
      std::thread::scope(|s| {
         let waiter = s.spawn(|| matches!(lock.lock(), Ok(None)));
         std::thread::sleep(std::time::Duration::from_millis(20));
         guard.commit();
         assert!(waiter.join().unwrap());
      });
   }

   #[test]
   fn owner_tokens_differ_between_threads() {
      let here = owner_token();
      let there = std::thread::spawn(owner_token).join().unwrap();
      assert_ne!(here, InitLock::NO_OWNER);
      assert_ne!(here, there);
   }
}
