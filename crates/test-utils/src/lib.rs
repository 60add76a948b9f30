pub mod builders;
pub mod fake_launcher;

use std::rc::Rc;
use std::sync::Once;

use runwatch::engine::Supervisor;
use runwatch::schedule::ManualScheduler;
use tracing_subscriber::{EnvFilter, fmt};

pub use fake_launcher::{FakeBehaviour, FakeLauncher, FakeProcessControl};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// A supervisor on a virtual clock with scripted processes.
pub fn fake_supervisor(launcher: FakeLauncher) -> (Supervisor, ManualScheduler) {
    let scheduler = ManualScheduler::new();
    let supervisor = Supervisor::new(Rc::new(scheduler.clone()), Rc::new(launcher));
    (supervisor, scheduler)
}

/// Run a future with a 5-second timeout.
#[allow(dead_code)]
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(std::time::Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}
