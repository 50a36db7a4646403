//! `legion list|new|rename|delete|history|config`

use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, ContentArrangement, Table};
use console::style;
use legion_client::render::render_transcript;
use legion_client::ConversationApi;
use legion_transcript::Transcript;

pub async fn list(api: &dyn ConversationApi) -> anyhow::Result<()> {
    let conversations = api.list_conversations().await?;
    if conversations.is_empty() {
        println!("No conversations yet. Create one with `legion new`.");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["ID", "Title", "Messages", "Updated", "Work dir"]);
    for conv in &conversations {
        table.add_row(vec![
            Cell::new(&conv.id).fg(Color::Cyan),
            Cell::new(&conv.title),
            Cell::new(conv.message_count),
            Cell::new(&conv.updated_at),
            Cell::new(&conv.work_dir),
        ]);
    }
    println!("{table}");
    Ok(())
}

pub async fn create(
    api: &dyn ConversationApi,
    title: &str,
    work_dir: Option<&str>,
) -> anyhow::Result<()> {
    let conv = api.create_conversation(title, work_dir).await?;
    println!(
        "Created {} {}",
        style(&conv.id).cyan(),
        style(&conv.title).bold()
    );
    println!("  Work dir: {}", conv.work_dir);
    Ok(())
}

pub async fn rename(api: &dyn ConversationApi, id: &str, title: &str) -> anyhow::Result<()> {
    let conv = api.rename_conversation(id, title).await?;
    println!("Renamed {} to {}", style(&conv.id).cyan(), style(&conv.title).bold());
    Ok(())
}

pub async fn delete(api: &dyn ConversationApi, id: &str) -> anyhow::Result<()> {
    api.delete_conversation(id).await?;
    println!("Deleted {}", style(id).cyan());
    Ok(())
}

pub async fn history(api: &dyn ConversationApi, id: &str, json: bool) -> anyhow::Result<()> {
    let messages = api.history(id).await?;
    let transcript = Transcript::from_history(&messages);
    if json {
        println!("{}", serde_json::to_string_pretty(&transcript.snapshot())?);
    } else if transcript.turns().is_empty() {
        println!("No messages yet.");
    } else {
        println!("{}", render_transcript(transcript.turns()));
    }
    Ok(())
}

pub async fn show_config(api: &dyn ConversationApi) -> anyhow::Result<()> {
    let config = api.agent_config().await?;
    println!(
        "Default model: {} (thinking {})",
        style(&config.default_model).bold(),
        if config.default_thinking { "on" } else { "off" }
    );

    let mut models = Table::new();
    models
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Model", "Provider", "Backend model", "Context", "Thinking"]);
    for (name, model) in &config.models {
        models.add_row(vec![
            Cell::new(name).fg(Color::Cyan),
            Cell::new(&model.provider),
            Cell::new(&model.model),
            Cell::new(model.max_context_size),
            Cell::new(if model.supports_thinking() { "yes" } else { "no" }),
        ]);
    }
    println!("{models}");

    let mut providers = Table::new();
    providers
        .load_preset(UTF8_FULL)
        .set_header(vec!["Provider", "Type", "Base URL"]);
    for (name, provider) in &config.providers {
        providers.add_row(vec![
            Cell::new(name).fg(Color::Cyan),
            Cell::new(&provider.provider_type),
            Cell::new(&provider.base_url),
        ]);
    }
    println!("{providers}");
    Ok(())
}
