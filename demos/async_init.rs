use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};

use lazy_provider::LazyProvider;
use tokio::time::{sleep, Duration};

type AsyncInit = Pin<Box<dyn Future<Output = Result<String, std::io::Error>> + Send>>;

static COUNTER: AtomicUsize = AtomicUsize::new(0);
static ASYNC_DATA: LazyProvider<String, fn() -> AsyncInit> = LazyProvider::new(load);

fn load() -> AsyncInit {
   Box::pin(async {
      // This future is awaited only once
      COUNTER.fetch_add(1, Ordering::Relaxed);
      println!("Initializing async data...");
      sleep(Duration::from_millis(50)).await;
      Ok("Async expensive data".to_string())
   })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
   tracing_subscriber::fmt()
      .with_env_filter(tracing_subscriber::EnvFilter::new("lazy_provider=debug"))
      .with_thread_ids(true)
      .init();

   let tasks: Vec<_> = (0..5)
      .map(|_| {
         tokio::spawn(async {
            match ASYNC_DATA.get_async().await {
               Ok(data) => println!("Task access: {data}"),
               Err(e) => println!("Task failed: {e}"),
            }
         })
      })
      .collect();

   for t in tasks {
      t.await?;
   }

   assert_eq!(COUNTER.load(Ordering::Relaxed), 1); // Future awaited only once
   println!("Final async data: {}", ASYNC_DATA.get_async().await?);
   Ok(())
}
