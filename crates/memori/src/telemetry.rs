//! Tracing subscriber setup for host applications that want Memori's
//! internal `tracing` spans on stdout without wiring their own subscriber.

use tracing_subscriber::{fmt, EnvFilter};

/// Installs a compact, `RUST_LOG`-driven subscriber as the global default.
/// Call once at process startup; safe to skip if the host application
/// already installs its own subscriber.
pub fn init_tracing() {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(env_filter))
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_target(true)
        .with_level(true)
        .compact()
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
