//! Data models for the SPE pipeline.

mod cohort;
mod declaration;
mod establishment;

pub use cohort::{
    declarations_filename, establishments_filename, export_csv_url, normalize_filename, Cohort,
};
pub use declaration::{Declaration, DeclarationSet};
pub use establishment::{
    detect_campaign_years, is_missing_value, is_true_value, EconomicModel, Establishment,
    ManagementType,
};
