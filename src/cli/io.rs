//! JSON output for CLI commands
//!
//! One JSON object per line on stdout: `{"status": "ok", "data": ...}`.
//! Errors go to stderr from `main`.

use std::io::{self, Write};

use serde_json::{json, Value};

use super::errors::CliResult;

/// Write a success response to stdout
pub fn write_response(data: Value) -> CliResult<()> {
    write_line(&mut io::stdout(), &json!({ "status": "ok", "data": data }))
}

fn write_line(out: &mut impl Write, value: &Value) -> CliResult<()> {
    serde_json::to_writer(&mut *out, value)?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_line_is_single_json_line() {
        let mut out = Vec::new();
        write_line(&mut out, &json!({ "status": "ok", "data": [1, 2] })).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.ends_with('\n'));
        assert_eq!(text.lines().count(), 1);
        let parsed: Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(parsed["data"], json!([1, 2]));
    }
}
