//! Call command implementation.

use crate::json::{from_json, to_json};
use crate::profile::Session;
use stackless_client::Value;

/// Parses each argument as one JSON document.
pub fn parse_arguments(args: &[String]) -> Result<Vec<Value>, Box<dyn std::error::Error>> {
    args.iter()
        .enumerate()
        .map(|(i, text)| -> Result<Value, Box<dyn std::error::Error>> {
            let json: serde_json::Value = serde_json::from_str(text)
                .map_err(|e| format!("Argument {} is not valid JSON: {e}", i + 1))?;
            Ok(from_json(&json))
        })
        .collect()
}

/// Runs the call command.
pub async fn run(
    session: &Session,
    class_id: u32,
    primary_key: &str,
    method_id: u32,
    args: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let arguments = parse_arguments(args)?;
    let class = session.service_class(class_id)?;
    let service = session.client.service(class, primary_key)?;

    let returned = session.client.call_method(&service, method_id, &arguments).await;
    session.client.close_connections().await;

    println!("{}", serde_json::to_string_pretty(&to_json(&returned?))?);
    Ok(())
}
