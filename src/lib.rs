pub mod contact_layers;
pub mod disease_model;
pub mod epidemic_state;
pub mod interventions;
pub mod parameters;
pub mod population_loader;
pub mod reports;
pub mod schools;

// Re-export commonly used types at the crate root
pub use parameters::{DiseaseParams, Params};
pub use population_loader::Age;
pub use schools::{SchoolConfig, SchoolsReport};
