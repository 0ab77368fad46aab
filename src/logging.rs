//! Tracing subscriber setup for binaries and tests embedding the harvester.

use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_DIRECTIVE: &str = "catalog_harvester=info";

/// Installs a formatted subscriber filtered by `RUST_LOG`.
///
/// Does nothing if a global subscriber is already set.
pub fn init() {
    init_with(DEFAULT_DIRECTIVE);
}

/// Same as [`init`], with a custom fallback filter.
pub fn init_with(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init();
        init_with("catalog_harvester=debug");
        tracing::info!("subscriber installed");
    }
}
