use std::sync::atomic::{AtomicBool, Ordering};

use lazy_provider::{LazyProvider, ProviderState};

static FAIL_NEXT: AtomicBool = AtomicBool::new(true);
static MAYBE_DATA: LazyProvider<String, fn() -> Result<String, &'static str>> =
   LazyProvider::new(try_load);

fn try_load() -> Result<String, &'static str> {
   let fail = FAIL_NEXT.load(Ordering::SeqCst);
   println!("Attempting initialization (fail={fail})...");
   if fail {
      Err("Initialization failed!")
   } else {
      Ok("Successfully initialized".to_string())
   }
}

fn main() {
   tracing_subscriber::fmt()
      .with_env_filter(tracing_subscriber::EnvFilter::new("lazy_provider=debug"))
      .init();

   // First attempt fails
   match MAYBE_DATA.get() {
      Ok(_) => panic!("Should have failed"),
      Err(e) => println!("Caught error: {e}"),
   }
   assert_eq!(MAYBE_DATA.state(), ProviderState::Uninitialized); // Failure was not cached

   // Second attempt succeeds
   FAIL_NEXT.store(false, Ordering::SeqCst);
   match MAYBE_DATA.get() {
      Ok(data) => println!("Got data: {data}"),
      Err(_) => panic!("Should have succeeded"),
   }
   assert!(MAYBE_DATA.is_ready());

   // Later calls return the instance without running the constructor
   FAIL_NEXT.store(true, Ordering::SeqCst);
   match MAYBE_DATA.get() {
      Ok(data) => println!("Got data again: {data}"),
      Err(_) => panic!("Should have returned existing data"),
   }
}
