//! Get command implementation.

use crate::json::entity_to_json;
use crate::profile::Session;

/// Runs the get command.
pub async fn run(
    session: &Session,
    class_id: u32,
    primary_key: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let class = session.entity_class(class_id)?;
    let entity = session.client.get_entity(class, primary_key).await?;
    session.client.close_connections().await;

    match entity {
        Some(entity) => println!("{}", serde_json::to_string_pretty(&entity_to_json(&entity))?),
        None => {
            return Err(format!("Entity {primary_key} of class {class_id} is deleted").into());
        }
    }
    Ok(())
}
