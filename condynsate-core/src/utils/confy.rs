use std::error::Error;

use confy::ConfyError;

/// Formats a confy error together with its underlying cause.
pub fn detailed_error(error: &ConfyError) -> String {
    match error.source() {
        Some(source) => format!("{}: {}", error, source),
        None => error.to_string(),
    }
}
