/// Initialise logging for the Gale runner.
///
/// Logs at `info` unless `RUST_LOG` says otherwise. Safe to call more than once, only the first call
/// installs the logger.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .is_test(cfg!(test))
        .try_init();
}
