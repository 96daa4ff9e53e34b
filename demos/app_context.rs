//! A database handle shared through an application context.
//!
//! The connection is built on first use, once, no matter how many workers ask
//! for it. Nothing outside the `db` module can build a `Database` directly.

use std::sync::Arc;
use std::thread;

use lazy_provider::{LazyProvider, ProviderError};

mod db {
   use std::sync::atomic::{AtomicUsize, Ordering};

   /// Connections opened so far, to show there is only ever one.
   pub static OPENED: AtomicUsize = AtomicUsize::new(0);

   #[derive(Debug, thiserror::Error)]
   #[error("cannot reach database at {0}")]
   pub struct ConnectError(pub String);

   #[derive(Debug)]
   pub struct Database {
      url: String,
   }

   impl Database {
      pub fn query(&self, sql: &str) -> String {
         format!("[{}] {sql}", self.url)
      }
   }

   /// The only way to construct a `Database`.
   pub fn connect() -> Result<Database, ConnectError> {
      let url = std::env::var("APP_DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/app".into());
      if url.is_empty() {
         return Err(ConnectError(url));
      }
      OPENED.fetch_add(1, Ordering::SeqCst);
      tracing::info!(%url, "opened database connection");
      Ok(Database { url })
   }
}

type Connect = fn() -> Result<db::Database, db::ConnectError>;

/// Owns every lazily built service of the application.
struct AppContext {
   database: LazyProvider<db::Database, Connect>,
}

impl AppContext {
   fn new() -> Self {
      Self {
         database: LazyProvider::new(db::connect),
      }
   }

   fn database(&self) -> Result<&db::Database, ProviderError<db::ConnectError>> {
      self.database.get()
   }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
   tracing_subscriber::fmt()
      .with_env_filter(
         tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,lazy_provider=debug")),
      )
      .with_target(false)
      .with_thread_ids(true)
      .init();

   let context = Arc::new(AppContext::new());

   let workers: Vec<_> = ["users", "orders", "invoices"]
      .into_iter()
      .map(|table| {
         let context = Arc::clone(&context);
         thread::spawn(move || -> Result<String, ProviderError<db::ConnectError>> {
            Ok(context.database()?.query(&format!("SELECT * FROM {table}")))
         })
      })
      .collect();

   for worker in workers {
      match worker.join() {
         Ok(Ok(row)) => println!("{row}"),
         Ok(Err(e)) => println!("query failed: {e}"),
         Err(_) => println!("worker panicked"),
      }
   }

   let opened = db::OPENED.load(std::sync::atomic::Ordering::SeqCst);
   println!("connections opened: {opened}");
   assert!(opened <= 1);
   println!("{:?}", context.database()?);
   Ok(())
}
