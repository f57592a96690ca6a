use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// Re-export tracing macros for convenience
pub use tracing::{debug, error, info, instrument, span, trace, warn, Level, Span};

/// Initialize the tracing system
///
/// `RUST_LOG` wins when set; otherwise `default_filter` (e.g. `"info"` or
/// `"caplife_refresh=debug"`) is used. Events go to stderr in compact form.
/// Fails instead of panicking when a global subscriber is already installed.
pub fn init(default_filter: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .or_else(|_| EnvFilter::try_new("info"))?;

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(is_tty())
        .compact()
        .with_target(true)
        .with_thread_ids(false)
        .with_level(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

fn is_tty() -> bool {
    std::io::IsTerminal::is_terminal(&std::io::stderr())
}

/// Span covering one refresh cycle for a tenant configuration
pub fn refresh_span(service_type: &str, config_id: &str, sequence: u64) -> Span {
    span!(
        Level::INFO,
        "capability_refresh",
        service_type = %service_type,
        config_id = %config_id,
        sequence = %sequence
    )
}

/// Span covering one document store write
pub fn upsert_span(content_id: &str) -> Span {
    span!(Level::DEBUG, "document_upsert", content_id = %content_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_an_error() {
        let _ = init("debug");
        assert!(init("debug").is_err());
    }

    #[test]
    fn test_spans_carry_names() {
        let _ = init("debug");
        let span = refresh_span("payments", "urn:config:1", 3);
        if let Some(metadata) = span.metadata() {
            assert_eq!(metadata.name(), "capability_refresh");
        }
        let span = upsert_span("doc-1");
        if let Some(metadata) = span.metadata() {
            assert_eq!(metadata.name(), "document_upsert");
        }
    }
}
