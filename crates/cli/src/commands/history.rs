//! `relayclaw history`: print the stored turns of a conversation.

use relayclaw_core::store::TurnStore;
use relayclaw_memory::SqliteStore;
use std::path::Path;

pub async fn run(
    config_path: &Path,
    conversation_id: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path)?;
    let database = config.persistence.database_path();
    if !database.exists() {
        println!("  No database at {} (run `relayclaw serve` first)", database.display());
        return Ok(());
    }

    let store = SqliteStore::open(&database).await?;
    let turns = store.conversation(conversation_id).await?;
    if turns.is_empty() {
        println!("  No turns stored for conversation {conversation_id}");
        return Ok(());
    }

    println!("Conversation {conversation_id} ({} turns)", turns.len());
    for turn in &turns {
        println!();
        println!(
            "[{}] {} via {} ({} tokens)",
            turn.created_at.format("%Y-%m-%d %H:%M:%S"),
            turn.role.as_str(),
            turn.model_used,
            turn.token_count
        );
        println!("{}", turn.content);
    }

    Ok(())
}
