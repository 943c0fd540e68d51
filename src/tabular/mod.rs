//! Paginated retrieval from the data.gouv.fr tabular API.

mod client;
mod fetcher;

pub use client::{HttpTabularClient, PageOutcome, TabularClient, TabularPage};
pub use fetcher::{FetchOutcome, FetchProgress, PageFetcher};
