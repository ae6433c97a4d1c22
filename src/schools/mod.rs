//! School contact-network interventions.
//!
//! At setup the population's generic school layer is split into one layer per
//! school. Each simulated day every open school decides who attends, applies
//! testing, tracing and symptom screening, and hands the host the pruned layer
//! for that day.
use chrono::NaiveDate;
use indexmap::IndexSet;
use ixa::{
    define_data_plugin, define_rng, info, Context, ContextRandomExt, IxaError, PersonId,
    PluginContext,
};
use serde::{Deserialize, Serialize};

pub mod contact_manager;
pub mod manager;
pub mod school;
pub mod stats;
pub mod testing;

#[cfg(test)]
mod scenarios;

pub use crate::population_loader::{RoleGroup, SchoolType};
pub use contact_manager::ScheduleKind;
pub use manager::{SchoolScenario, SchoolsManager};
pub use school::School;
pub use stats::{SchoolStatsReport, SchoolsReport};
pub use testing::{SchoolTesting, TestingCampaign};

use crate::{
    interventions::ContextInterventionExt,
    parameters::{validate_probability, ContextParametersExt, Params},
};

// Every school draws from this one stream, in the order schools were
// registered, so a seed reproduces a run exactly.
define_rng!(SchoolRng);

/// Behavioral parameters shared by every school of one type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchoolConfig {
    /// First day of in-person attendance.
    pub start_date: NaiveDate,
    pub schedule: ScheduleKind,
    /// Probability an arriving person with symptoms or a diagnosis is caught by screening.
    pub screen_prob: f64,
    /// Probability a screen-positive person gets a follow-up PCR test.
    pub screen2pcr: f64,
    /// PCR turnaround in days for screen-positive people.
    pub test_delay: u32,
    /// Probability a newly diagnosed person's school contacts are traced.
    pub trace_prob: f64,
    /// Probability a traced contact complies with quarantine.
    pub quar_prob: f64,
    /// Daily probability of an influenza-like illness triggering screening.
    pub ili_prob: f64,
    /// Transmission multiplier for this type's school layers. Defaults to the generic school layer's.
    #[serde(default)]
    pub beta_s: Option<f64>,
    #[serde(default)]
    pub testing: Option<Vec<TestingCampaign>>,
    /// Days an antigen-positive person not sent to follow-up PCR stays home.
    /// Defaults to the quarantine period.
    #[serde(default)]
    pub unconfirmed_antigen_isolation: Option<u32>,
}

pub fn validate_school_config(config: &SchoolConfig) -> Result<(), IxaError> {
    validate_probability("screening probability", config.screen_prob)?;
    validate_probability("screen-to-PCR probability", config.screen2pcr)?;
    validate_probability("tracing probability", config.trace_prob)?;
    validate_probability("quarantine compliance probability", config.quar_prob)?;
    validate_probability("influenza-like illness probability", config.ili_prob)?;
    if let Some(beta_s) = config.beta_s {
        if beta_s < 0.0 {
            return Err(IxaError::IxaError(
                "The school transmission multiplier must be non-negative.".to_string(),
            ));
        }
    }
    for campaign in config.testing.iter().flatten() {
        campaign.validate()?;
    }
    Ok(())
}

/// Independently keep each person with probability `probability`. Certain
/// outcomes (0 or 1) and empty inputs consume no random draws.
pub(crate) fn binomial_filter<'a>(
    context: &Context,
    probability: f64,
    people: impl IntoIterator<Item = &'a PersonId>,
) -> IndexSet<PersonId> {
    if probability <= 0.0 {
        return IndexSet::new();
    }
    if probability >= 1.0 {
        return people.into_iter().copied().collect();
    }
    people
        .into_iter()
        .copied()
        .filter(|_| context.sample_bool(SchoolRng, probability))
        .collect()
}

#[derive(Default)]
struct SchoolsReportContainer {
    report: Option<SchoolsReport>,
}

define_data_plugin!(
    SchoolsReportPlugin,
    SchoolsReportContainer,
    SchoolsReportContainer::default()
);

pub trait ContextSchoolsExt: PluginContext {
    /// The per-school statistics, available once the final day has run.
    fn get_school_report(&self) -> Option<&SchoolsReport> {
        self.get_data(SchoolsReportPlugin).report.as_ref()
    }

    fn store_school_report(&mut self, report: SchoolsReport) {
        self.get_data_mut(SchoolsReportPlugin).report = Some(report);
    }
}

impl ContextSchoolsExt for Context {}

impl SchoolScenario {
    #[must_use]
    pub fn from_params(params: &Params) -> Self {
        SchoolScenario {
            start_date: params.start_date,
            n_days: params.n_days,
            quarantine_period: params.quarantine_period,
            school_layer: params.school_layer,
            schools: params.schools.clone(),
        }
    }
}

/// Partition the generic school layer and register the schools intervention.
pub fn init(context: &mut Context) -> Result<(), IxaError> {
    let scenario = SchoolScenario::from_params(context.get_params());
    let manager = SchoolsManager::new(context, &scenario)?;
    info!(
        "Registered {} schools across {} school types",
        manager.number_of_schools(),
        scenario.schools.values().filter(|c| c.is_some()).count()
    );
    context.register_daily_intervention(manager);
    Ok(())
}
