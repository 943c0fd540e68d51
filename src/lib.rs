//! Analysis pipeline for the state public catering service (SPE) over the
//! Registre National des Cantines.
//!
//! The pipeline fetches a cohort's establishments and EGalim
//! télédéclarations from the data.gouv.fr tabular API, geocodes them through
//! the business registry with a commune-centroid fallback, classifies each
//! site against the SPE perimeter, audits data quality and ranks the rows
//! for review.

pub mod audit;
pub mod cancel;
pub mod classify;
pub mod cli;
pub mod config;
pub mod error;
pub mod geocode;
pub mod models;
pub mod pipeline;
pub mod rank;
pub mod tabular;

/// Identifies the tool to the public APIs it calls.
pub const USER_AGENT: &str = concat!("spe-cantines/", env!("CARGO_PKG_VERSION"));

pub use error::{Result, SpeError};
