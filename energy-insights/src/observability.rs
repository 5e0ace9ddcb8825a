use tracing_subscriber::EnvFilter;

const DEFAULT_DIRECTIVE: &str = "energy_insights=info";

/// Install the global fmt subscriber. A valid `RUST_LOG` replaces the default
/// `energy_insights=info` filter entirely.
pub fn init_tracing() {
    let filter = build_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn build_filter(from_env: Option<String>) -> EnvFilter {
    from_env
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_directive_can_raise_crate_level() {
        let filter = build_filter(Some("energy_insights=debug".to_string()));
        assert_eq!(filter.to_string(), "energy_insights=debug");
    }

    #[test]
    fn missing_env_falls_back_to_info() {
        assert_eq!(build_filter(None).to_string(), DEFAULT_DIRECTIVE);
        assert_eq!(build_filter(Some("  ".to_string())).to_string(), DEFAULT_DIRECTIVE);
    }
}
