/// Logging initialization: tracing-subscriber::fmt → stderr.
///
/// Called once at the start of `App::new()`, before anything else. Safe to
/// call again (tests construct several apps in one process).
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agora_core=debug,info".into()),
        )
        .try_init();
}
