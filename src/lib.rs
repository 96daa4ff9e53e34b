//! A thread-safe lazy singleton provider.
//!
//! [`LazyProvider<T, F>`] owns a constructor `F` and builds the instance `T`
//! from it the first time anyone asks. Every caller, on any thread, receives a
//! reference to that one instance.
//!
//! - **At most one construction**: concurrent first callers block (or yield, in
//!   async code) behind whichever caller won the race, then share its result.
//! - **Failures are retried, not cached**: if the constructor returns an error or
//!   panics, the provider goes back to uninitialized and the next caller tries again.
//! - **Re-entrancy is an error**: a constructor that calls back into its own
//!   provider gets [`ProviderError::Reentrant`] instead of deadlocking.
//! - **Lock-free fast path**: once constructed, `get` is a single atomic load.
//!
//! A provider is an ordinary value. Put it in whatever owns the instance's
//! lifetime, such as an application context or a dependency-injection root.
//! Because [`LazyProvider::new`] is `const`, a `static` works too.
//!
//! # Examples
//!
//! ## Sharing one connection
//!
//! ```rust
//! use lazy_provider::LazyProvider;
//!
//! struct Connection {
//!    url: String,
//! }
//!
//! fn connect() -> Result<Connection, std::io::Error> {
//!    Ok(Connection { url: "postgres://localhost/app".to_string() })
//! }
//!
//! static DATABASE: LazyProvider<Connection, fn() -> Result<Connection, std::io::Error>> =
//!    LazyProvider::new(connect);
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let a = DATABASE.get()?;
//! let b = DATABASE.get()?;
//! assert!(std::ptr::eq(a, b));
//! assert_eq!(a.url, "postgres://localhost/app");
//! # Ok(())
//! # }
//! ```
//!
//! ## Retrying a failed construction
//!
//! ```rust
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use lazy_provider::{LazyProvider, ProviderError, ProviderState};
//!
//! let attempts = AtomicUsize::new(0);
//! let provider = LazyProvider::new(|| {
//!    if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
//!       Err("not yet")
//!    } else {
//!       Ok(42)
//!    }
//! });
//!
//! assert_eq!(provider.get(), Err(ProviderError::Construction("not yet")));
//! assert_eq!(provider.state(), ProviderState::Uninitialized);
//! assert_eq!(provider.get(), Ok(&42));
//! assert_eq!(provider.state(), ProviderState::Ready);
//! ```

/// Construction errors.
mod error;

/// Shared-instance provider.
mod provider;

/// Internal synchronization state management.
mod state;

pub use error::ProviderError;
pub use provider::LazyProvider;
pub use state::ProviderState;
