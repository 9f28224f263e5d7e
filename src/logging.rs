//! Logging setup: a `tracing-subscriber` `EnvFilter` selectable by the
//! `-log` CLI flag (spec.md §6.1), mirroring the teacher's own
//! `tracing_subscriber::fmt` initialization.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber at the given level name
/// (`error`, `warn`, `info`, `debug`, `trace`). Falls back to `info` on an
/// unrecognized level rather than failing startup over a typo'd flag.
pub fn init(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_does_not_panic_on_unknown_level() {
        init("not-a-real-level");
    }
}
