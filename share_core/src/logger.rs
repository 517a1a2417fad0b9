//! Logging bootstrap. Everything else logs through the `tracing` macros.

use tracing_subscriber::EnvFilter;

/// Level directive for a signed verbosity (`-q` = -1, each `-v` adds one).
pub fn level_for(verbosity: i8) -> &'static str {
    match verbosity {
        i8::MIN..=-1 => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Install the global stderr subscriber. Calling it again is a no-op.
pub fn init(verbosity: i8) {
    let filter = EnvFilter::new(level_for(verbosity));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_levels() {
        assert_eq!(level_for(-1), "error");
        assert_eq!(level_for(0), "info");
        assert_eq!(level_for(1), "debug");
        assert_eq!(level_for(5), "trace");
    }

    #[test]
    fn init_twice_is_harmless() {
        init(0);
        init(2);
        tracing::info!("logger initialised");
    }
}
