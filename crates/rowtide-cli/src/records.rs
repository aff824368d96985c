use std::io::Write;

use anyhow::{Context, Result};

use rowtide_core::Record;

/// Parse one JSON-lines record. The line must hold a JSON object.
pub fn parse_record(line: &str) -> Result<Record> {
    let record: Record = serde_json::from_str(line).context("Record is not a JSON object")?;
    Ok(record)
}

pub fn write_record(out: &mut impl Write, record: &Record) -> Result<()> {
    serde_json::to_writer(&mut *out, record).context("Failed to serialize record")?;
    out.write_all(b"\n").context("Failed to write record")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowtide_core::Value;

    #[test]
    fn test_parse_and_write() {
        let record = parse_record(r#"{"host": {"ip": "10.1.1.1"}, "n": 3}"#).unwrap();
        assert_eq!(record.get("[host][ip]"), Some(&Value::from("10.1.1.1")));
        assert_eq!(record.get("n"), Some(&Value::Int(3)));

        let mut out = Vec::new();
        write_record(&mut out, &record).unwrap();
        let written = String::from_utf8(out).unwrap();
        assert!(written.ends_with('\n'));
        assert_eq!(parse_record(written.trim()).unwrap(), record);
    }

    #[test]
    fn test_rejects_non_objects() {
        assert!(parse_record("[1, 2]").is_err());
        assert!(parse_record("not json").is_err());
    }
}
