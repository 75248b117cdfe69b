// Copyright (c) 2018-2022 The Botho Foundation

//! Botho Logging.
//!
//! Logging goes through the `tracing` framework; library code uses the
//! `tracing` macros directly and never installs a subscriber. Binaries and
//! tests call one of the initialisers below, enabled by the `loggers`
//! feature.
//!
//! Configuration is read from the environment:
//! - `RUST_LOG`: log level filter (default: "info")
//! - `BTH_LOG_JSON`: if "1", emit JSON lines instead of the terminal format

pub use tracing::{debug, error, info, trace, warn};

#[cfg(feature = "loggers")]
mod init {
    use std::{
        env,
        io::{self, IsTerminal},
        sync::Once,
    };
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    /// Global initialization guard for the tracing subscriber.
    static INIT: Once = Once::new();

    fn env_filter() -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }

    /// Initialize the process-wide subscriber writing to stderr.
    ///
    /// Subsequent calls are no-ops. If another subscriber was already
    /// installed the error is ignored.
    pub fn init_logging() {
        INIT.call_once(|| {
            let use_json = env::var("BTH_LOG_JSON").unwrap_or_default() == "1";

            let result = if use_json {
                tracing_subscriber::registry()
                    .with(env_filter())
                    .with(
                        fmt::layer()
                            .json()
                            .with_target(true)
                            .with_writer(io::stderr),
                    )
                    .try_init()
            } else {
                tracing_subscriber::registry()
                    .with(env_filter())
                    .with(
                        fmt::layer()
                            .with_target(false)
                            .with_ansi(io::stderr().is_terminal())
                            .with_writer(io::stderr),
                    )
                    .try_init()
            };

            let _ = result;
        });
    }

    /// Initialize a subscriber suitable for test execution.
    ///
    /// Output goes through the libtest writer so it is captured per test.
    pub fn init_test_logging() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .with_test_writer()
            .try_init();
    }

}

#[cfg(feature = "loggers")]
pub use init::{init_logging, init_test_logging};
