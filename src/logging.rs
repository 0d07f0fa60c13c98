//! Tracing subscriber setup for binaries, demos and tests

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "exds=info";

/// Install a formatting subscriber filtered by `RUST_LOG`
/// (default [`DEFAULT_FILTER`]).
///
/// Safe to call more than once; only the first call installs anything.
pub fn init() {
    install(false);
}

/// Like [`init`], but writes through the test harness so output is captured
/// per test.
pub fn init_for_tests() {
    install(true);
}

fn install(test_writer: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    // Fails only if a global subscriber already exists.
    let _ = if test_writer {
        builder.with_test_writer().try_init()
    } else {
        builder.try_init()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_for_tests();
        init_for_tests();
        init();
        tracing::info!("logging initialised");
    }
}
