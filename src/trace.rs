use std::sync::Once;

use tracing_subscriber::{prelude::*, EnvFilter};

use crate::settings::LogFormat;

static INIT: Once = Once::new();
static TEST_INIT: Once = Once::new();

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize tracing once. `RUST_LOG` selects the filter (default `info`); `log_format` selects
/// human-readable compact text or structured JSON lines.
pub fn init(log_format: LogFormat) -> anyhow::Result<()> {
    let mut init_result: Option<anyhow::Result<()>> = None;
    INIT.call_once(|| {
        let env_filter = build_env_filter();
        let registry = tracing_subscriber::registry();
        let result = match log_format {
            LogFormat::Text => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(true)
                        .with_level(true)
                        .compact()
                        .with_filter(env_filter),
                )
                .try_init(),
            LogFormat::Json => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(true)
                        .with_level(true)
                        .json()
                        .with_filter(env_filter),
                )
                .try_init(),
        };
        init_result = Some(result.map_err(anyhow::Error::from));
    });
    init_result.unwrap_or(Ok(()))
}

// Test output goes through the libtest capture so only failing tests print their logs.
fn init_for_tests() {
    TEST_INIT.call_once(|| {
        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .compact()
                    .with_filter(build_env_filter()),
            )
            .try_init();
    });
}

/// Run an async test body inside a span named after the test.
pub async fn with_test_tracing<F, Fut, T>(test_name: &str, f: F) -> T
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = T>,
{
    use tracing::Instrument;

    init_for_tests();
    let span = tracing::info_span!("test", name = test_name);
    f().instrument(span).await
}

/// Run a sync test body inside a span named after the test.
/// This is the synchronous equivalent of `with_test_tracing`.
pub fn with_test_tracing_sync<F, T>(test_name: &str, f: F) -> T
where
    F: FnOnce() -> T,
{
    init_for_tests();
    let span = tracing::info_span!("test", name = test_name);
    let _entered = span.enter();
    f()
}
