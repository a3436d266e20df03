//! Output formatting for CLI commands.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cli::args::{OutputFormat, SegbaseArgs};
use crate::error::Result;

/// Result structure for a bulk load.
#[derive(Debug, Serialize, Deserialize)]
pub struct LoadResult {
    pub records_loaded: usize,
    pub lines_skipped: usize,
    pub first_record_number: u64,
    pub duration_ms: u64,
    pub records_per_second: f64,
}

/// Result structure for a key lookup.
#[derive(Debug, Serialize, Deserialize)]
pub struct FindResult {
    pub index: String,
    pub value: String,
    pub total: usize,
    pub record_numbers: Vec<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<Vec<Value>>,
}

/// Output a result in the specified format.
pub fn output_result<T: Serialize>(message: &str, result: &T, args: &SegbaseArgs) -> Result<()> {
    match args.output_format {
        OutputFormat::Human => output_human(message, result, args),
        OutputFormat::Json => output_json(result, args),
    }
}

/// Output in human-readable format.
fn output_human<T: Serialize>(message: &str, result: &T, args: &SegbaseArgs) -> Result<()> {
    if args.verbosity() > 0 {
        println!("{message}");
        println!();
    }

    let value = serde_json::to_value(result)?;

    match result {
        _ if std::any::type_name::<T>().contains("FindResult") => output_find_human(&value),
        _ if std::any::type_name::<T>().contains("DatabaseStats") => output_stats_human(&value),
        _ => output_generic_human(&value),
    }
}

fn output_find_human(value: &Value) -> Result<()> {
    let total = value.get("total").and_then(Value::as_u64).unwrap_or(0);
    let shown = value
        .get("record_numbers")
        .and_then(Value::as_array)
        .map_or(&[][..], Vec::as_slice);
    println!("{total} records");
    match value.get("records").and_then(Value::as_array) {
        Some(records) => {
            for (record_number, record) in shown.iter().zip(records) {
                println!("{}: {record}", format_value(record_number));
            }
        }
        None => {
            for record_number in shown {
                println!("{}", format_value(record_number));
            }
        }
    }
    if (shown.len() as u64) < total {
        println!("... {} more", total - shown.len() as u64);
    }
    Ok(())
}

fn output_stats_human(value: &Value) -> Result<()> {
    if let Some(obj) = value.as_object() {
        println!("Database Statistics:");
        println!("═══════════════════");
        for key in [
            "name",
            "records",
            "high_record_number",
            "existence_segments",
            "list_pages",
            "bitmap_pages",
            "freed_list_pages",
            "freed_bitmap_pages",
        ] {
            if let Some(val) = obj.get(key) {
                println!("{}: {}", key.replace('_', " "), format_value(val));
            }
        }

        if let Some(indexes) = obj.get("indexes").and_then(Value::as_object)
            && !indexes.is_empty()
        {
            println!();
            println!("Indexes:");
            println!("────────");
            for (name, stats) in indexes {
                let keys = stats.get("keys").and_then(Value::as_u64).unwrap_or(0);
                let postings = stats.get("postings").and_then(Value::as_u64).unwrap_or(0);
                println!("{name}: {keys} keys, {postings} postings");
            }
        }
    }
    Ok(())
}

fn output_generic_human(value: &Value) -> Result<()> {
    match value {
        Value::Object(obj) => {
            for (key, val) in obj {
                let formatted_val = format_value(val);
                println!("{key}: {formatted_val}");
            }
        }
        _ => {
            let formatted_value = format_value(value);
            println!("{formatted_value}");
        }
    }
    Ok(())
}

/// Output in JSON format.
fn output_json<T: Serialize>(result: &T, args: &SegbaseArgs) -> Result<()> {
    let json = if args.pretty {
        serde_json::to_string_pretty(result)?
    } else {
        serde_json::to_string(result)?
    };

    println!("{json}");
    Ok(())
}

/// Format a JSON value for human output.
fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(arr) => {
            let formatted_values = arr.iter().map(format_value).collect::<Vec<_>>().join(", ");
            format!("[{formatted_values}]")
        }
        Value::Object(_) => "[object]".to_string(),
        Value::Null => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(&json!("win")), "win");
        assert_eq!(format_value(&json!(42)), "42");
        assert_eq!(format_value(&json!([1, 2])), "[1, 2]");
        assert_eq!(format_value(&json!({"a": 1})), "[object]");
        assert_eq!(format_value(&Value::Null), "-");
    }

    #[test]
    fn test_find_result_skips_missing_records() {
        let result = FindResult {
            index: "result".to_string(),
            value: "win".to_string(),
            total: 2,
            record_numbers: vec![0, 2],
            records: None,
        };
        let value = serde_json::to_value(&result).unwrap();
        assert!(value.get("records").is_none());
        assert_eq!(value["record_numbers"], json!([0, 2]));
    }
}
