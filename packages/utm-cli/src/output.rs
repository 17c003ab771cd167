use std::io::Write;

/// Write a block of text to stdout, followed by a newline.
pub fn write_stdout(text: &str) -> Result<(), String> {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    handle
        .write_all(text.as_bytes())
        .and_then(|_| handle.write_all(b"\n"))
        .and_then(|_| handle.flush())
        .map_err(|e| format!("Failed to write to stdout: {}", e))
}

/// Serialize a value to pretty JSON.
pub fn to_json<T: serde::Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {}", e))
}

/// Serialize a value and print it to stdout.
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<(), String> {
    write_stdout(&to_json(value)?)
}

/// Seconds with millisecond precision, as used in event lines
pub fn format_secs(secs: f64) -> String {
    format!("{:.3}s", secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_secs() {
        assert_eq!(format_secs(0.0), "0.000s");
        assert_eq!(format_secs(2.5), "2.500s");
        assert_eq!(format_secs(0.1234), "0.123s");
    }

    #[test]
    fn test_to_json_is_pretty() {
        let json = to_json(&serde_json::json!({"tests": 2})).unwrap();
        assert!(json.contains("\n"));
        assert!(json.contains("\"tests\": 2"));
    }
}
