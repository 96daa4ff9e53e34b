use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};

use lazy_provider::LazyProvider;

static COUNTER: AtomicUsize = AtomicUsize::new(0);
static DATA: LazyProvider<String, fn() -> Result<String, Infallible>> = LazyProvider::new(load_data);

fn load_data() -> Result<String, Infallible> {
   // This runs only once
   COUNTER.fetch_add(1, Ordering::Relaxed);
   println!("Initializing data...");
   std::thread::sleep(std::time::Duration::from_millis(50));
   Ok("Expensive data".to_string())
}

fn main() {
   tracing_subscriber::fmt()
      .with_env_filter(tracing_subscriber::EnvFilter::new("lazy_provider=debug"))
      .with_thread_ids(true)
      .init();

   let threads: Vec<_> = (0..5)
      .map(|_| {
         std::thread::spawn(|| {
            println!("Thread access: {}", DATA.force());
         })
      })
      .collect();

   for t in threads {
      t.join().unwrap();
   }

   assert_eq!(DATA.peek(), Some(&"Expensive data".to_string()));
   assert_eq!(COUNTER.load(Ordering::Relaxed), 1); // Constructor ran only once
   println!("Final data: {}", DATA.force());
}
