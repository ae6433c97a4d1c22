use std::{collections::HashMap, path::PathBuf};

use chrono::NaiveDate;
use ixa::{define_global_property, ContextGlobalPropertiesExt, IxaError};
use serde::{Deserialize, Serialize};

use crate::{
    contact_layers::LayerParams,
    reports::ReportType,
    schools::{validate_school_config, SchoolConfig, SchoolType},
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct DiseaseParams {
    /// Per-contact, per-day transmission probability before layer multipliers.
    pub beta: f64,
    /// Mean number of days from exposure to becoming infectious.
    pub latent_period: f64,
    /// Mean number of days a person stays infectious.
    pub infectious_period: f64,
    /// Shape of the gamma distributions the periods above are drawn from.
    pub period_shape: f64,
    /// Probability that an infection ever becomes symptomatic.
    pub symptomatic_probability: f64,
    /// Days from becoming infectious to symptom onset.
    pub symptom_onset_delay: u32,
    /// Probability that an infection ends in death rather than recovery.
    pub fatality_probability: f64,
}

impl Default for DiseaseParams {
    fn default() -> Self {
        DiseaseParams {
            beta: 0.02,
            latent_period: 4.0,
            infectious_period: 8.0,
            period_shape: 4.0,
            symptomatic_probability: 0.6,
            symptom_onset_delay: 1,
            fatality_probability: 0.0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Params {
    /// The random seed for the simulation.
    pub seed: u64,
    /// The number of simulated days. Day indices run from 0 to `n_days - 1`.
    pub n_days: u32,
    /// Calendar date of day 0.
    pub start_date: NaiveDate,
    /// Days a person stays home after a diagnosis or a traced exposure.
    pub quarantine_period: u32,
    /// The number of infections we seed the population with on day 0.
    pub initial_infections: usize,
    pub disease: DiseaseParams,
    /// The path to the synthetic population file loaded in `population_loader`
    pub synth_population_file: PathBuf,
    /// The path to the generic school contact edge list
    pub school_contacts_file: PathBuf,
    /// Layer parameters of the generic school layer, copied onto every per-school layer
    pub school_layer: LayerParams,
    /// Scenario configuration per school type. A missing or null entry means
    /// schools of that type never open.
    pub schools: HashMap<SchoolType, Option<SchoolConfig>>,
    pub reports: Vec<ReportType>,
}

impl Default for Params {
    fn default() -> Self {
        Params {
            seed: 0,
            n_days: 1,
            start_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or(NaiveDate::MIN),
            quarantine_period: 14,
            initial_infections: 0,
            disease: DiseaseParams::default(),
            synth_population_file: PathBuf::new(),
            school_contacts_file: PathBuf::new(),
            school_layer: LayerParams::default(),
            schools: HashMap::new(),
            reports: vec![],
        }
    }
}

pub(crate) fn validate_probability(name: &str, value: f64) -> Result<(), IxaError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(IxaError::IxaError(format!(
            "The {name} must be between 0 and 1, inclusive, but was {value}."
        )));
    }
    Ok(())
}

fn validate_disease_params(disease: &DiseaseParams) -> Result<(), IxaError> {
    validate_probability("transmission probability beta", disease.beta)?;
    validate_probability("symptomatic probability", disease.symptomatic_probability)?;
    validate_probability("fatality probability", disease.fatality_probability)?;
    if disease.latent_period <= 0.0 || disease.infectious_period <= 0.0 {
        return Err(IxaError::IxaError(
            "The latent and infectious periods must be positive.".to_string(),
        ));
    }
    if disease.period_shape <= 0.0 {
        return Err(IxaError::IxaError(
            "The period shape must be positive.".to_string(),
        ));
    }
    Ok(())
}

fn validate_inputs(parameters: &Params) -> Result<(), IxaError> {
    if parameters.n_days == 0 {
        return Err(IxaError::IxaError(
            "The number of simulated days must be positive.".to_string(),
        ));
    }
    validate_disease_params(&parameters.disease)?;
    parameters.school_layer.validate()?;
    for (school_type, config) in &parameters.schools {
        if let Some(config) = config {
            validate_school_config(config).map_err(|err| {
                IxaError::IxaError(format!("Invalid configuration for {school_type}: {err:?}"))
            })?;
        }
    }
    Ok(())
}

define_global_property!(Parameters, Params, validate_inputs);

pub trait ContextParametersExt {
    fn get_params(&self) -> &Params;
}

impl ContextParametersExt for ixa::Context {
    fn get_params(&self) -> &Params {
        self.get_global_property_value(Parameters)
            .expect("Expected Parameters to be set")
    }
}
