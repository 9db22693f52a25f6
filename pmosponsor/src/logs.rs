//! Initialisation du logging
//!
//! Le niveau minimum vient de `host.logger.min_level`; la variable
//! `RUST_LOG`, si elle est définie, a priorité.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const KNOWN_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Normalise un niveau de configuration ("INFO", " Debug ") en directive de filtre.
///
/// Un niveau inconnu retombe sur `info`.
pub fn level_directive(level: &str) -> &'static str {
    let level = level.trim().to_ascii_lowercase();
    KNOWN_LEVELS
        .iter()
        .copied()
        .find(|known| *known == level)
        .unwrap_or("info")
}

/// Installe le subscriber global (console uniquement).
pub fn init_logging(min_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_directive(min_level)));

    // Déjà initialisé (tests) : on ignore
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_level(true))
        .try_init();
}
