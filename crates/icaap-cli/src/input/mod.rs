pub mod file;

use serde::de::DeserializeOwned;
use std::io::{self, Read};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Typed command input from `--input <file>` or, failing that, piped stdin.
pub fn read_input<T: DeserializeOwned>(path: Option<&str>, command: &str) -> CliResult<T> {
    if let Some(path) = path {
        return file::read_json(path);
    }
    // An interactive terminal has nothing piped
    if !atty::is(atty::Stream::Stdin) {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        if let Some(value) = parse_piped(&buffer)? {
            return Ok(value);
        }
    }
    Err(format!("--input <file.json> or stdin required for {command}").into())
}

/// Parse piped text; blank input means nothing was supplied.
fn parse_piped<T: DeserializeOwned>(buffer: &str) -> CliResult<Option<T>> {
    let trimmed = buffer.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(trimmed)
        .map(Some)
        .map_err(|e| format!("Failed to parse stdin: {e}").into())
}
