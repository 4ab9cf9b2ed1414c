use callback_queue::{Concurrency, Queue};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

async fn fetch(id: u32, delay_ms: u64) -> Result<String, String> {
  info!("Fetch {} starting (concurrency test)", id);
  tokio::time::sleep(Duration::from_millis(delay_ms)).await;
  Ok(format!("payload {}", id))
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  let concurrency = Concurrency::try_from(3).expect("non-zero limit");
  let queue = Queue::<String, String>::new(concurrency, "fetch_queue");
  info!("--- Future Tasks Example (limit {}) ---", queue.concurrency());

  for id in 0..8u32 {
    let delay_ms = 100 * u64::from(8 - id);
    queue.defer_future(&Handle::current(), fetch(id, delay_ms)).expect("defer before await");
  }

  let results = queue.join().expect("first notifier").await_result().await;
  info!("Results in registration order: {:?}", results);
  info!("--- Future Tasks Example End ---");
}
