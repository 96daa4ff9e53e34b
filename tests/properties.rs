//! Property tests for exactly-once construction.
//!
//! However many callers race on a fresh provider, and however many of the
//! early attempts fail, the constructor succeeds once and every caller ends up
//! holding the same instance.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Barrier;
use std::thread;

use lazy_provider::LazyProvider;
use proptest::prelude::*;

/// Races `callers` threads, each calling `get` `calls_each` times, and returns
/// every address observed plus the number of constructor invocations.
fn race(callers: usize, calls_each: usize, failures: usize) -> (Vec<usize>, usize) {
   let invocations = AtomicUsize::new(0);
   let provider = LazyProvider::new(|| {
      if invocations.fetch_add(1, Ordering::SeqCst) < failures {
         Err("transient")
      } else {
         Ok(Box::new(0u64))
      }
   });
   let barrier = Barrier::new(callers);
   let (provider, barrier) = (&provider, &barrier);

   let addresses = thread::scope(|s| {
      let workers: Vec<_> = (0..callers)
         .map(|_| {
            s.spawn(move || {
               barrier.wait();
               let mut seen = Vec::with_capacity(calls_each);
               while seen.len() < calls_each {
                  if let Ok(value) = provider.get() {
                     seen.push(&**value as *const u64 as usize);
                  }
               }
               seen
            })
         })
         .collect();
      workers
         .into_iter()
         .flat_map(|w| w.join().unwrap())
         .collect::<Vec<_>>()
   });
   (addresses, invocations.load(Ordering::SeqCst))
}

proptest! {
   #![proptest_config(ProptestConfig::with_cases(32))]

   #[test]
   fn prop_constructor_runs_once(callers in 1usize..12, calls_each in 1usize..8) {
      let (addresses, invocations) = race(callers, calls_each, 0);
      prop_assert_eq!(invocations, 1);
      prop_assert_eq!(addresses.len(), callers * calls_each);
      prop_assert!(addresses.windows(2).all(|w| w[0] == w[1]));
   }

   #[test]
   fn prop_failures_retry_then_converge(
      callers in 1usize..8,
      calls_each in 1usize..4,
      failures in 0usize..5
   ) {
      let (addresses, invocations) = race(callers, calls_each, failures);
      // Each failure costs one attempt; the first success ends construction
      prop_assert_eq!(invocations, failures + 1);
      prop_assert!(addresses.windows(2).all(|w| w[0] == w[1]));
   }
}
