//! The `freshness` command: publication date of the registry data.
//!
//! The resource creation date is the precise signal (the publisher uploads a
//! fresh file daily); when it is unavailable the dataset-level last update is
//! a coarser fallback.

use console::style;

use crate::config::{ApiConfig, CANTEEN_RESOURCE_ID, DATAGOUV_DATASET_ID};
use crate::tabular::{HttpTabularClient, TabularClient};

pub async fn run() -> anyhow::Result<()> {
    let api = ApiConfig::from_env();
    let client = HttpTabularClient::new(&api);

    if let Some(created) = client.resource_created_at(CANTEEN_RESOURCE_ID).await? {
        println!(
            "{} Registre publié le {}",
            style("✓").green(),
            created.format("%Y-%m-%d %H:%M UTC")
        );
        return Ok(());
    }
    match client.dataset_last_update(DATAGOUV_DATASET_ID).await? {
        Some(updated) => println!(
            "{} Jeu de données mis à jour le {} (date de la ressource indisponible)",
            style("!").yellow(),
            updated.format("%Y-%m-%d %H:%M UTC")
        ),
        None => println!(
            "{} date de publication indisponible",
            style("✗").red()
        ),
    }
    Ok(())
}
