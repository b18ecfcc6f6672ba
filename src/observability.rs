//! Observability utilities.

use std::sync::OnceLock;
use tracing::Dispatch;
use tracing_subscriber::{fmt, fmt::MakeWriter, prelude::*, EnvFilter};

use crate::types::ObservabilityConfig;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Initialize tracing subscriber once for the process with default settings.
pub fn init_tracing() {
    init_tracing_with(&ObservabilityConfig::default());
}

/// Initialize tracing subscriber once for the process.
///
/// `RUST_LOG` overrides `config.log_level`. Output is compact text unless
/// `config.json_logs` is set or `XLAT_LOG_FORMAT=json`. Logs go to stderr;
/// stdout belongs to the `xlatd` announcement stream.
pub fn init_tracing_with(config: &ObservabilityConfig) {
    TRACING_INIT.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
        let json = config.json_logs
            || std::env::var("XLAT_LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false);

        let dispatch = log_dispatch(env_filter, json, std::io::stderr);
        if let Err(err) = tracing::dispatcher::set_global_default(dispatch) {
            eprintln!("tracing init skipped: {err}");
        }
    });
}

fn log_dispatch<W>(env_filter: EnvFilter, json: bool, writer: W) -> Dispatch
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    if json {
        Dispatch::new(
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(writer)),
        )
    } else {
        Dispatch::new(
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().compact().with_writer(writer)),
        )
    }
}
