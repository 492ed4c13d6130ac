//! Logging setup shared by the worker binaries.
//!
//! Production emits one JSON object per event; development uses the pretty
//! formatter. Both keep the event target so broker (`amqp_worker`, `lapin`) and
//! mail (`lettre`) output can be told apart and filtered with `RUST_LOG`.

use crate::Environment;
use tracing::{debug, info};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Directives used when `RUST_LOG` is not set.
const PRODUCTION_FILTER: &str = "info,lapin=warn,lettre=warn";
const DEVELOPMENT_FILTER: &str = "debug,amqp_worker=trace,lapin=info,lettre=info";

/// Install color-eyre for report formatting.
///
/// Shows the error location, hides the environment section. A second call is a
/// no-op.
pub fn install_color_eyre() {
    let _ = color_eyre::config::HookBuilder::default()
        .display_location_section(true)
        .display_env_section(false)
        .install();
}

/// Default filter directives for `environment`.
pub fn default_filter(environment: &Environment) -> &'static str {
    if environment.is_production() {
        PRODUCTION_FILTER
    } else {
        DEVELOPMENT_FILTER
    }
}

fn filter_for(environment: &Environment) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(environment)))
}

/// Initialize the global subscriber with an `ErrorLayer` for span traces.
///
/// - **Production** (`APP_ENV=production`): flattened JSON events with target
///   and current span, broker and SMTP crates at `warn`.
/// - **Development**: pretty events with target, file and line. The client
///   library logs at `trace` so reconnect and topology replay are visible.
///
/// `RUST_LOG` replaces the defaults entirely (e.g. `info,amqp_worker=debug`).
/// Calling this after a subscriber is installed leaves the first one in place,
/// which is what tests rely on.
///
/// ```ignore
/// use tracing::instrument;
/// use eyre::{Result, WrapErr};
///
/// #[instrument(skip(service), fields(user_id = %user_id))]
/// async fn welcome(service: &NotificationService, user_id: &str) -> Result<String> {
///     service
///         .notify_welcome(Recipient::new(user_id, "a@b.com", "Ann"), "hi")
///         .await
///         .wrap_err("Failed to queue welcome notification")
/// }
/// ```
pub fn init_tracing(environment: &Environment) {
    let filter = filter_for(environment);

    let result = if environment.is_production() {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .flatten_event(true),
            )
            .with(tracing_error::ErrorLayer::default())
            .with(filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .pretty(),
            )
            .with(tracing_error::ErrorLayer::default())
            .with(filter)
            .try_init()
    };

    match result {
        Ok(_) => info!(environment = ?environment, "Tracing initialized"),
        Err(_) => debug!("Tracing already initialized"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_per_environment() {
        assert_eq!(default_filter(&Environment::Production), PRODUCTION_FILTER);
        assert_eq!(default_filter(&Environment::Development), DEVELOPMENT_FILTER);
        assert!(DEVELOPMENT_FILTER.contains("amqp_worker=trace"));
        assert!(PRODUCTION_FILTER.contains("lapin=warn"));
    }

    #[test]
    fn test_default_filters_parse() {
        for directives in [PRODUCTION_FILTER, DEVELOPMENT_FILTER] {
            assert!(EnvFilter::try_new(directives).is_ok(), "{directives}");
        }
    }

    #[test]
    fn test_rust_log_overrides_default_filter() {
        temp_env::with_var("RUST_LOG", Some("warn,amqp_worker=debug"), || {
            let filter = filter_for(&Environment::Production).to_string();
            assert!(filter.contains("amqp_worker=debug"));
            assert!(!filter.contains("lettre"));
        });
    }

    #[test]
    fn test_default_filter_used_without_rust_log() {
        temp_env::with_var_unset("RUST_LOG", || {
            let filter = filter_for(&Environment::Development).to_string();
            assert!(filter.contains("amqp_worker=trace"));
        });
    }

    #[test]
    fn test_init_tracing_multiple_calls() {
        init_tracing(&Environment::Production);
        init_tracing(&Environment::Development);
    }
}
