//! Watch command implementation.

use crate::json::entity_to_json;
use crate::profile::Session;
use serde_json::json;
use stackless_client::ChangeListener;
use tokio::sync::mpsc;

/// Runs the watch command until interrupted or the entity is deleted.
pub async fn run(
    session: &Session,
    class_id: u32,
    primary_key: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let class = session.entity_class(class_id)?;
    let client = &session.client;
    let entity = client
        .get_entity(class, primary_key)
        .await?
        .ok_or_else(|| format!("Entity {primary_key} of class {class_id} is deleted"))?;
    println!("{}", serde_json::to_string(&entity_to_json(&entity))?);

    let (tx, mut rx) = mpsc::unbounded_channel();
    client.add_update_listener(
        std::slice::from_ref(&entity),
        ChangeListener::from_fn(move |update| {
            let _ = tx.send(update);
        }),
    );
    client.subscribe_updates(std::slice::from_ref(&entity)).await?;
    eprintln!("Watching {primary_key}; press Ctrl-C to stop");

    loop {
        tokio::select! {
            update = rx.recv() => {
                let Some(update) = update else { break };
                let line = json!({
                    "deleted": update.deleted,
                    "at": chrono::Utc::now().to_rfc3339(),
                    "entity": entity_to_json(&update.entity),
                });
                println!("{}", serde_json::to_string(&line)?);
                if update.deleted {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                if let Err(err) = client.unsubscribe_updates(std::slice::from_ref(&entity)).await {
                    tracing::warn!(error = %err, "unsubscribe failed");
                }
                break;
            }
        }
    }

    client.close_connections().await;
    Ok(())
}
