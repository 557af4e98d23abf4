//! Error display for the command line

use colored::Colorize;

use crate::error::ProxyError;

/// Format an error for CLI display
#[must_use]
pub fn format_error(error: &ProxyError) -> String {
    match error {
        ProxyError::Configuration { message, key } => {
            let location = key
                .as_deref()
                .map(|k| format!(" ({k})"))
                .unwrap_or_default();
            format!(
                "{} Configuration error{}\n  {}\n\n{}\n  {}",
                "✗".red().bold(),
                location,
                message,
                "Suggestion:".yellow(),
                "Run `mcprouter validate-config --config <FILE>` to check the file"
            )
        }
        ProxyError::Io(err) => {
            format!(
                "{} I/O error\n  {}\n\n{}\n  {}",
                "✗".red().bold(),
                err,
                "Suggestion:".yellow(),
                "Check that the bind address is free and reachable"
            )
        }
        _ => format!("{} {}", "✗".red().bold(), error),
    }
}

/// Display an error to stderr and return exit code
#[must_use]
pub fn display_error(error: &ProxyError) -> i32 {
    eprintln!("{}", format_error(error));
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_names_key() {
        colored::control::set_override(false);
        let error = ProxyError::configuration_with_key("bad address", "server.bind");
        let formatted = format_error(&error);
        assert!(formatted.contains("Configuration error (server.bind)"));
        assert!(formatted.contains("bad address"));
        assert_eq!(display_error(&error), 1);
    }

    #[test]
    fn test_other_errors_use_display() {
        colored::control::set_override(false);
        let formatted = format_error(&ProxyError::ServerNotFound("weather".into()));
        assert!(formatted.contains("Server not found: weather"));
    }
}
