use std::env;

use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber; `RUST_LOG` wins over the verbosity flag.
pub fn init(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
    if verbose {
        debug!("verbose logging enabled");
    }
}

pub fn env_flag() -> bool {
    env::var("ADEVAL_VERBOSE")
        .map(|value| parse_bool(value.trim()))
        .unwrap_or(false)
}

pub(crate) fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_values() {
        for raw in ["1", "true", "YES", " on "] {
            assert!(parse_bool(raw), "{raw}");
        }
        for raw in ["0", "false", "", "verbose"] {
            assert!(!parse_bool(raw), "{raw}");
        }
    }
}
