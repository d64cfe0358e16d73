pub mod aggregate;
pub mod calibrate;
pub mod recommend;
pub mod report;
pub mod simulate;
pub mod transform;

use serde::de::DeserializeOwned;

/// Parse a snake_case enum argument (segment, severity) through serde.
pub(crate) fn parse_enum<T: DeserializeOwned>(s: &str) -> Result<T, String> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|_| format!("unrecognised value '{s}'"))
}
