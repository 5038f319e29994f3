use tracing_subscriber::EnvFilter;

/// Installs the global fmt subscriber once; later calls are no-ops.
///
/// `RUST_LOG` wins over `verbosity`, which raises the default `info` level
/// to `debug` (`-v`) or `trace` (`-vv`).
pub fn init_logging(verbosity: u8) {
    let default_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
