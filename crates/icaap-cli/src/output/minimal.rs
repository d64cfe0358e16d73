use serde_json::Value;

/// Print just the key answer value from the output.
///
/// Heuristic: look for well-known result fields in order of priority,
/// then fall back to the first field in the result object.
pub fn print_minimal(value: &Value) {
    // Try to extract the "result" envelope
    let result_obj = value
        .as_object()
        .and_then(|m| m.get("result"))
        .unwrap_or(value);

    // Priority list of key output fields
    let priority_keys = [
        "selected_severity",
        "selected",
        "recommended",
        "tail_metrics",
        "metrics",
        "curve_sets",
        "correlation",
    ];

    if let Value::Object(map) = result_obj {
        // Try priority keys first (skip null values)
        for key in &priority_keys {
            if let Some(val) = map.get(*key) {
                if *key == "metrics" {
                    if let Value::Object(per_severity) = val {
                        print_expected_losses(per_severity);
                        return;
                    }
                }
                if !val.is_null() {
                    println!("{}", format_minimal(val));
                    return;
                }
            }
        }

        // Fall back to first field
        if let Some((key, val)) = map.iter().next() {
            println!("{}: {}", key, format_minimal(val));
            return;
        }
    }

    // Not an object, just print directly
    println!("{}", format_minimal(result_obj));
}

/// One `severity: expected_loss` line per stressed severity.
fn print_expected_losses(per_severity: &serde_json::Map<String, Value>) {
    for (severity, metrics) in per_severity {
        let loss = metrics.get("expected_loss").unwrap_or(&Value::Null);
        println!("{}: {}", severity, format_minimal(loss));
    }
}

fn format_minimal(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}
