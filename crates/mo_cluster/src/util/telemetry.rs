use tracing_subscriber::{prelude::*, EnvFilter, Registry};

/// Initialize tracing
///
/// `RUST_LOG` selects the filter (default `info`), `MO_LOG_FORMAT=json` switches to
/// structured output.
pub async fn init() {
    let env_filter = EnvFilter::try_from_default_env()
        .or(EnvFilter::try_new("info"))
        .expect("static filter directive is valid");

    let json = std::env::var("MO_LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    let logger = if json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().compact().boxed()
    };

    let collector = Registry::default().with(logger).with(env_filter);

    tracing::subscriber::set_global_default(collector).expect("tracing subscriber installed twice");
}
