//! Lazily constructed, shared-instance provider.
//!
//! This module provides [`LazyProvider<T, F>`], which owns a constructor `F`
//! and the instance `T` it produces. The instance is built on the first
//! successful `get` and handed out by reference from then on. A failed or
//! panicking construction is not cached: the provider goes back to
//! uninitialized and the next caller runs the constructor again.
//!
//! Readers take a lock-free fast path (a single `Acquire` load). Callers that
//! arrive while construction is in flight park on a futex, or yield to the
//! runtime when using the async API, until the constructing caller finishes.

use core::cell::UnsafeCell;
use core::convert::Infallible;
use core::sync::atomic::Ordering;
use core::{any, fmt, mem};

use crate::error::ProviderError;
use crate::state::{InitGuard, InitLock, ProviderState, Reentrant};

#[cfg(any(feature = "async-tokio", feature = "async-tokio-mt"))]
tokio::task_local! {
   /// Addresses of the providers the current task is constructing, outermost first.
   static CONSTRUCTING: Vec<usize>;
}

/// Constructs a shared instance at most once and hands out references to it.
///
/// `create` is called when the first caller asks for the instance. Concurrent
/// callers wait for that construction instead of starting their own, and all of
/// them get a reference to the same instance. If `create` fails, the error goes
/// to the caller that ran it and the provider stays uninitialized, so a later
/// call tries again.
///
/// # Examples
///
/// ```rust
/// use std::convert::Infallible;
/// use lazy_provider::LazyProvider;
///
/// let provider = LazyProvider::new(|| Ok::<_, Infallible>(vec![1, 2, 3]));
///
/// let first = provider.force();
/// let second = provider.force();
/// assert!(std::ptr::eq(first, second));
/// ```
pub struct LazyProvider<T, F> {
   create: F,
   value: UnsafeCell<mem::MaybeUninit<T>>,
   lock: InitLock,
}

impl<T, F> LazyProvider<T, F> {
   /// Creates an uninitialized provider that will build its instance with `create`.
   ///
   /// Nothing runs until the first `get`. This is a `const fn`, so a provider can
   /// be placed in a `static` when `F` is a function pointer.
   #[inline]
   #[must_use]
   pub const fn new(create: F) -> Self {
      Self {
         create,
         value: UnsafeCell::new(mem::MaybeUninit::uninit()),
         lock: InitLock::new(),
      }
   }

   /// Checks whether the instance has been constructed.
   ///
   /// This method never blocks.
   #[inline]
   pub fn is_ready(&self) -> bool {
      self.lock.is_done(Ordering::Acquire)
   }

   /// Reports whether the provider is uninitialized, initializing, or ready.
   ///
   /// The answer can be stale by the time the caller looks at it, except for
   /// [`ProviderState::Ready`], which is final. This method never blocks.
   #[inline]
   pub fn state(&self) -> ProviderState {
      self.lock.phase()
   }

   /// Returns the instance if it has been constructed, without constructing it.
   ///
   /// Returns `None` while uninitialized or while construction is in flight.
   /// This method never blocks.
   #[inline]
   pub fn peek(&self) -> Option<&T> {
      if self.is_ready() {
         // SAFETY: DONE was observed with Acquire, so the write is visible.
         Some(unsafe { self.get_unchecked() })
      } else {
         None
      }
   }

   /// Returns the instance, constructing it with `create` if needed.
   ///
   /// - If ready, returns a reference to the instance.
   /// - If uninitialized, calls `create`:
   ///     - On `Ok(value)`, stores it and returns a reference to it.
   ///     - On `Err(e)`, returns [`ProviderError::Construction`] and leaves the provider uninitialized.
   /// - If another thread is constructing, blocks until it finishes.
   /// - If `create` itself calls `get` on this provider, that inner call returns
   ///   [`ProviderError::Reentrant`] immediately.
   ///
   /// However many threads call this concurrently, only one `create` runs at a time,
   /// and it stops being called after its first success.
   #[inline]
   pub fn get<E>(&self) -> Result<&T, ProviderError<E>>
   where
      F: Fn() -> Result<T, E>,
   {
      if let Some(value) = self.peek() {
         return Ok(value);
      }
      self.initialize()?;
      debug_assert!(self.is_ready());
      // SAFETY: initialize returned Ok, so the instance is published.
      Ok(unsafe { self.get_unchecked() })
   }

   /// Returns the instance of a provider whose constructor cannot fail.
   ///
   /// # Panics
   ///
   /// Panics if the constructor calls back into this provider.
   #[inline]
   pub fn force(&self) -> &T
   where
      F: Fn() -> Result<T, Infallible>,
   {
      match self.get::<Infallible>() {
         Ok(value) => value,
         Err(ProviderError::Reentrant) => panic!(
            "reentrant initialization of LazyProvider<{}>",
            any::type_name::<T>()
         ),
         Err(ProviderError::Construction(never)) => match never {},
      }
   }

   /// Returns the instance, constructing it with the future returned by `create` if needed.
   ///
   /// The async counterpart of [`get`](Self::get). Tasks that arrive while another
   /// task is constructing yield to the runtime until it finishes. On the
   /// multi-threaded runtime, a task that keeps finding the provider busy falls
   /// back to `block_in_place`. Dropping the returned future while it is constructing
   /// counts as a failed construction, and the provider goes back to uninitialized.
   ///
   /// Re-entrancy is tracked per task: a constructor future that awaits `get_async`
   /// on its own provider receives [`ProviderError::Reentrant`].
   #[cfg(any(feature = "async-tokio", feature = "async-tokio-mt"))]
   #[inline]
   pub async fn get_async<E, Fut>(&self) -> Result<&T, ProviderError<E>>
   where
      F: Fn() -> Fut,
      Fut: core::future::Future<Output = Result<T, E>>,
   {
      if let Some(value) = self.peek() {
         return Ok(value);
      }
      self.initialize_async().await?;
      debug_assert!(self.is_ready());
      // SAFETY: initialize_async returned Ok, so the instance is published.
      Ok(unsafe { self.get_unchecked() })
   }

   /// Returns a reference to the instance without checking that it exists.
   ///
   /// # Safety
   ///
   /// The provider must be ready, as observed through an `Acquire` load.
   #[inline]
   unsafe fn get_unchecked(&self) -> &T {
      debug_assert!(self.is_ready(), "get_unchecked called on uninitialized LazyProvider");
      // SAFETY: the caller guarantees the value is initialized and published.
      unsafe { (*self.value.get()).assume_init_ref() }
   }

   // --- Internal Initialization Helpers ---

   /// Stores `value` and publishes it.
   #[inline]
   fn publish(&self, guard: InitGuard<'_>, value: T) {
      // SAFETY: holding the guard gives exclusive access to the slot, and the
      // slot is empty because the provider is not DONE.
      unsafe { (*self.value.get()).write(value) };
      guard.commit();
   }

   /// Cold path for `get`. Takes the guard and runs the constructor.
   #[cold]
   fn initialize<E>(&self) -> Result<(), ProviderError<E>>
   where
      F: Fn() -> Result<T, E>,
   {
      let guard = match self.lock.lock() {
         Ok(Some(guard)) => guard,
         Ok(None) => return Ok(()), // Another thread finished while we waited
         Err(Reentrant) => {
            tracing::error!(
               instance = any::type_name::<T>(),
               "constructor re-entered its own provider"
            );
            return Err(ProviderError::Reentrant);
         }
      };
      tracing::debug!(instance = any::type_name::<T>(), "constructing instance");
      match (self.create)() {
         Ok(value) => {
            self.publish(guard, value);
            tracing::debug!(instance = any::type_name::<T>(), "instance ready");
            Ok(())
         }
         Err(err) => {
            drop(guard); // Reset so the next caller retries
            tracing::warn!(
               instance = any::type_name::<T>(),
               "construction failed, provider reset"
            );
            Err(ProviderError::Construction(err))
         }
      }
   }

   /// Cold path for `get_async`. Takes the guard asynchronously and awaits the constructor.
   #[cfg(any(feature = "async-tokio", feature = "async-tokio-mt"))]
   #[cold]
   async fn initialize_async<E, Fut>(&self) -> Result<(), ProviderError<E>>
   where
      F: Fn() -> Fut,
      Fut: core::future::Future<Output = Result<T, E>>,
   {
      let key = self as *const Self as usize;
      let mut chain = CONSTRUCTING.try_with(Vec::clone).unwrap_or_default();
      if chain.contains(&key) {
         tracing::error!(
            instance = any::type_name::<T>(),
            "constructor re-entered its own provider"
         );
         return Err(ProviderError::Reentrant);
      }

      let Some(guard) = self.lock.lock_async().await else {
         return Ok(()); // Another task finished while we waited
      };
      chain.push(key);
      tracing::debug!(instance = any::type_name::<T>(), "constructing instance");
      // If this future is dropped mid-construction, the guard's Drop resets the provider.
      match CONSTRUCTING.scope(chain, async { (self.create)().await }).await {
         Ok(value) => {
            self.publish(guard, value);
            tracing::debug!(instance = any::type_name::<T>(), "instance ready");
            Ok(())
         }
         Err(err) => {
            drop(guard);
            tracing::warn!(
               instance = any::type_name::<T>(),
               "construction failed, provider reset"
            );
            Err(ProviderError::Construction(err))
         }
      }
   }
}

// --- Trait Implementations ---

// SAFETY:
// Sharing `&LazyProvider` hands out `&T` to many threads (`T: Sync`), and the
// instance may be constructed on one thread and dropped on another (`T: Send`).
// `create` is called through `&F` from whichever thread wins the guard (`F: Sync`).
unsafe impl<T: Send + Sync, F: Sync> Sync for LazyProvider<T, F> {}
// SAFETY:
// Moving the provider moves the constructor and, if built, the instance.
unsafe impl<T: Send, F: Send> Send for LazyProvider<T, F> {}

impl<T: Default> Default for LazyProvider<T, fn() -> Result<T, Infallible>> {
   /// Creates a provider that constructs `T::default()`.
   #[inline]
   fn default() -> Self {
      Self::new(|| Ok(T::default()))
   }
}

impl<T: fmt::Display, F> fmt::Display for LazyProvider<T, F> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      match self.peek() {
         Some(v) => fmt::Display::fmt(v, f),
         None => f.write_str("<uninit>"),
      }
   }
}

impl<T: fmt::Debug, F> fmt::Debug for LazyProvider<T, F> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      let mut d = f.debug_tuple("LazyProvider");
      match self.peek() {
         Some(v) => d.field(v),
         None => d.field(&format_args!("<uninit>")),
      };
      d.finish()
   }
}

impl<T, F> Drop for LazyProvider<T, F> {
   #[inline]
   fn drop(&mut self) {
      if self.is_ready() {
         // SAFETY: we have exclusive access and the instance was published.
         unsafe { self.value.get_mut().assume_init_drop() };
      }
   }
}
