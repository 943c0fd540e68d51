//! The `export` command: CSV download URLs carrying the exact cohort filters.

use console::style;

use crate::config::{self, CANTEEN_RESOURCE_ID};
use crate::models::{
    declarations_filename, establishments_filename, export_csv_url, Cohort,
};

pub fn run(cohort: &Cohort, year: &str) -> anyhow::Result<()> {
    let api = config::ApiConfig::from_env();

    let establishments = export_csv_url(
        &api.tabular_base,
        CANTEEN_RESOURCE_ID,
        &cohort.establishment_filters(),
    )?;
    println!("{} {}", style("→").cyan(), establishments_filename(cohort));
    println!("  {establishments}");

    match config::teledeclaration_resource(year) {
        Some(resource_id) => {
            let declarations = export_csv_url(
                &api.tabular_base,
                resource_id,
                &cohort.declaration_filters(),
            )?;
            println!(
                "{} {}",
                style("→").cyan(),
                declarations_filename(cohort, year)
            );
            println!("  {declarations}");
        }
        None => println!(
            "{} aucune ressource de télédéclaration publiée pour {}",
            style("!").yellow(),
            year
        ),
    }
    Ok(())
}
