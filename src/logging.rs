//! Tracing setup and log formatting helpers.

use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber. `RUST_LOG` overrides the default
/// `info` level.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();
}

/// Prefix every line of `input` with `prefix`, for multi-line message bodies
/// in log output.
pub fn indent(input: &str, prefix: &str) -> String {
    input
        .split('\n')
        .map(|line| format!("{prefix}{line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indent_single_line() {
        assert_eq!(indent("ping", "<--- "), "<--- ping");
    }

    #[test]
    fn indent_multi_line_keeps_trailing_line() {
        assert_eq!(indent("a\nb\n", "---> "), "---> a\n---> b\n---> ");
    }

    #[test]
    fn indent_empty() {
        assert_eq!(indent("", "> "), "> ");
    }
}
