//! Errors surfaced by [`LazyProvider`](crate::LazyProvider).

/// Why a provider could not hand out its instance.
///
/// Neither variant is cached: after either error the provider is still
/// uninitialized (or still being initialized by its original caller) and a
/// later call may succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError<E> {
   /// The constructor called back into the provider it is constructing.
   ///
   /// Waiting would never finish, since the caller it would wait for is itself.
   #[error("reentrant initialization: the constructor called back into its own provider")]
   Reentrant,

   /// The constructor returned an error. The provider reset to uninitialized.
   #[error("construction failed: {0}")]
   Construction(#[source] E),
}

impl<E> ProviderError<E> {
   /// Whether this is a re-entrant initialization error.
   #[inline]
   pub fn is_reentrant(&self) -> bool {
      matches!(self, Self::Reentrant)
   }

   /// The constructor's own error, if that is what this is.
   #[inline]
   pub fn into_construction(self) -> Option<E> {
      match self {
         Self::Construction(err) => Some(err),
         Self::Reentrant => None,
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[derive(Debug, thiserror::Error)]
   #[error("socket closed")]
   struct SocketClosed;

   #[test]
   fn construction_exposes_source() {
      let err = ProviderError::Construction(SocketClosed);
      assert_eq!(err.to_string(), "construction failed: socket closed");
      let source = std::error::Error::source(&err).map(ToString::to_string);
      assert_eq!(source.as_deref(), Some("socket closed"));
      assert!(!err.is_reentrant());
   }

   #[test]
   fn reentrant_has_no_construction_error() {
      let err: ProviderError<SocketClosed> = ProviderError::Reentrant;
      assert!(err.is_reentrant());
      assert!(std::error::Error::source(&err).is_none());
      assert!(err.into_construction().is_none());
   }
}
