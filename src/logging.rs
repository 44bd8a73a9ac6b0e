use tracing_subscriber::EnvFilter;

use crate::config::LogOpts;

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise the level comes from `DEBUG`/`INFO`.
pub fn init_tracing(opts: &LogOpts) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(opts.level()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    if opts.log_timestamp {
        builder.init();
    } else {
        builder.without_time().init();
    }
}
