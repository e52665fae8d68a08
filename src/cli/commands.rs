//! Command handlers. Each run loads the workspace's stored items, performs
//! one command and persists every item before returning.

use anyhow::{Context, Result, bail};
use std::time::Duration;
use tracing::{info, warn};

use super::args::{Args, Commands, parse_assignment};
use super::config::ConfigDiscovery;
use crate::facade::Facade;
use crate::item::{Component, Form, ItemId, ItemStatus};

pub async fn run(args: &Args) -> Result<()> {
    let command = args.command().map_err(anyhow::Error::msg)?;

    let discovery = ConfigDiscovery::new(args.workspace.as_deref());
    match command {
        Commands::ShowConfig => {
            print!("{}", discovery.report(args.config.as_deref()));
            return Ok(());
        }
        Commands::InitConfig => {
            let path = discovery.write_user_defaults()?;
            println!("User configuration: {}", path.display());
            return Ok(());
        }
        _ => {}
    }

    let config = discovery.load(args.config.as_deref())?;
    let facade = Facade::from_config(&config, args.workspace.clone())
        .await
        .context("Failed to start the item engine")?;
    let client = facade.connect();

    let result = execute(&facade, command, client, args.verbose).await;

    let written = facade.shutdown().await;
    if args.verbose {
        println!("Persisted {} items", written);
    }
    result
}

async fn execute(facade: &Facade, command: &Commands, client: u32, verbose: bool) -> Result<()> {
    match command {
        Commands::Types => {
            for name in facade.get_available_item_types() {
                println!("{}", name);
            }
        }
        Commands::List => {
            let items = facade.get_item_list().await;
            if items.is_empty() {
                println!("No items");
            }
            for summary in items {
                let status = facade
                    .get_item_status(summary.id)
                    .await
                    .unwrap_or(ItemStatus::InfoError);
                println!(
                    "{:>4}  {:<16} {:<24} {}",
                    summary.id, status, summary.name, summary.builder_name
                );
            }
        }
        Commands::Create { item_type, input } => {
            let id = match input {
                Some(path) => facade.import_file_as_item(path, item_type).await,
                None => facade.create_item(item_type).await,
            };
            let Some(id) = id else {
                bail!("Could not create an item of type '{}'", item_type);
            };
            let status = facade.get_item_status(id).await.unwrap_or_default();
            info!("Created item {} of type '{}'", id, item_type);
            println!("Created item {} ({})", id, status);
        }
        Commands::Show { id, json } => {
            let form = item_form(facade, *id).await?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&form)?);
            } else {
                let status = facade.get_item_status(*id).await.unwrap_or_default();
                print_form(&form, status, verbose);
            }
        }
        Commands::Set { id, values } => {
            let mut form = item_form(facade, *id).await?;
            for raw in values {
                let Some((name, value)) = parse_assignment(raw) else {
                    bail!("Expected NAME=VALUE, got '{}'", raw);
                };
                if !form.assign(name, value) {
                    bail!("Item {} has no entry '{}' accepting '{}'", id, name, value);
                }
            }
            let status = facade.update_item(form, client).await;
            println!("Item {}: {}", id, status);
        }
        Commands::Process {
            id,
            action,
            wait,
            timeout,
        } => {
            let mut status = facade.process_item(*id, action, client).await;
            if *wait && status == ItemStatus::Processing {
                status = facade
                    .wait_for_item(*id, Duration::from_secs(*timeout))
                    .await
                    .unwrap_or(ItemStatus::InfoError);
            } else if status == ItemStatus::Processing {
                warn!("Item {} is still running; the run stops when this command exits", id);
            }
            println!("Item {}: {}", id, status);
            if let Some(output) = facade.get_item_output_file(*id).await {
                println!("Output: {}", output.display());
            }
            if status == ItemStatus::NeedsInfo {
                println!("More input is needed; see `itemflow show {}`", id);
            }
        }
        Commands::Cancel { id, action } => {
            let status = facade.cancel_item_process(*id, action).await;
            println!("Item {}: {}", id, status);
        }
        Commands::Delete { id } => {
            if !facade.delete_item(*id).await {
                bail!("Item {} not found", id);
            }
            println!("Deleted item {}", id);
        }
        Commands::Post { message } => {
            if !facade.post_update_message(message).await {
                bail!("Update message was rejected");
            }
            println!("OK");
        }
        // Answered before the engine starts
        Commands::ShowConfig | Commands::InitConfig => {}
    }
    Ok(())
}

async fn item_form(facade: &Facade, id: ItemId) -> Result<Form> {
    match facade.get_item(id).await {
        Some(form) => Ok(form),
        None => bail!("Item {} not found", id),
    }
}

fn print_form(form: &Form, status: ItemStatus, verbose: bool) {
    println!("{} (item {}): {}", form.name, form.item_id, status);
    if verbose && !form.description.is_empty() {
        println!("  {}", form.description);
    }

    for component in &form.components {
        println!();
        println!("[{}]", component.name());
        match component {
            Component::Data(data) => {
                for entry in &data.entries {
                    let marker = if entry.required { "*" } else { " " };
                    println!("{} {} = {}", marker, entry.name, entry.value);
                    if verbose && !entry.allowed_values.is_empty() {
                        println!("    one of: {}", entry.allowed_values.join(", "));
                    }
                }
            }
            Component::Resources(resources) => {
                for resource in &resources.resources {
                    println!("  {}", resource.path.display());
                }
            }
            Component::MasterDetails(md) => {
                for entry in &md.globals.entries {
                    println!("  {} = {}", entry.name, entry.value);
                }
                println!("  templates: {}", md.template_names().join(", "));
                for (index, pair) in md.masters.iter().enumerate() {
                    println!("  {}[{}] {}", md.name, index, pair.master);
                    for entry in &pair.details.entries {
                        println!("      {} = {}", entry.name, entry.value);
                    }
                }
            }
        }
    }

    if !form.actions.is_empty() {
        println!();
        println!("Actions: {}", form.actions.join(", "));
    }
}
