//! Command layer
//!
//! Each command turns its parsed flags into an options struct, drives one
//! component and prints the result as JSON on stdout. Progress goes through
//! `tracing`, which writes to stderr.

pub mod db;
pub mod stickie_rel;

use crate::error::{confirmation_required, validation_error, AppResult};
use serde::Serialize;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Pretty JSON on stdout
pub fn print_json<T: Serialize>(value: &T) -> AppResult<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}

/// Pretty JSON on stderr, for results that must not mix with data on stdout
pub fn eprint_json<T: Serialize>(value: &T) -> AppResult<()> {
    let stderr = std::io::stderr();
    let mut err = stderr.lock();
    serde_json::to_writer_pretty(&mut err, value)?;
    writeln!(err)?;
    Ok(())
}

/// A flag that must be present and non-blank
pub fn required<'a>(flag: &str, value: &'a Option<String>) -> AppResult<&'a str> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(validation_error(format!("--{} is required", flag))),
    }
}

/// `KEY=VALUE` flag values
pub fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {:?}", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err("tag key cannot be empty".to_string());
    }
    Ok((key.to_string(), value.trim().to_string()))
}

/// Ask on stderr and require the operator to type YES
pub async fn confirm_interactively(prompt: &str) -> AppResult<()> {
    eprintln!("{}", prompt);
    eprint!("Type YES to confirm: ");
    std::io::stderr().flush()?;

    let mut line = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
    if accepts_confirmation(&line) {
        Ok(())
    } else {
        Err(confirmation_required("operator did not type YES"))
    }
}

fn accepts_confirmation(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case("YES")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_rejects_blank_values() {
        assert_eq!(required("from", &Some(" abc ".into())).unwrap(), "abc");
        let err = required("from", &Some("  ".into())).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert!(err.to_string().contains("--from"));
        assert!(required("to", &None).is_err());
    }

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("env = prod").unwrap(),
            ("env".to_string(), "prod".to_string())
        );
        assert_eq!(
            parse_key_value("note=a=b").unwrap(),
            ("note".to_string(), "a=b".to_string())
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn test_confirmation_answer() {
        assert!(accepts_confirmation("YES\n"));
        assert!(accepts_confirmation(" yes "));
        assert!(!accepts_confirmation("y\n"));
        assert!(!accepts_confirmation(""));
    }
}
