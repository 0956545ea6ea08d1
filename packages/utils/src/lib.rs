#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod context;
pub mod error;
pub mod evm_client;
pub mod serde;
pub mod telemetry;

// the test version of init_tracing does not take a config
// since config itself is tested and modified from different parallel tests
// therefore, this only uses the default tracing settings
// it's not gated out because it is used in integration tests of other packages as well
pub fn init_tracing_tests() {
    use std::sync::LazyLock;

    // there are race conditions across test threads
    // so we use a Mutex to ensure we only initialize once globally
    static INIT: LazyLock<std::sync::Mutex<bool>> = LazyLock::new(|| std::sync::Mutex::new(false));

    let mut init = match INIT.lock() {
        Ok(init) => init,
        Err(poisoned) => poisoned.into_inner(),
    };

    if !*init {
        *init = true;

        // try_init, since another harness may have installed a subscriber already
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        tracing::debug!("Tracing initialized for tests");
    }
}
