use std::collections::HashMap;

use chrono::NaiveDate;
use indexmap::IndexSet;
use ixa::{debug, info, trace, warn, Context, IxaError, PersonId};

use super::{ContextSchoolsExt, School, SchoolConfig, SchoolsReport};
use crate::{
    contact_layers::{ContactLayer, ContextContactLayersExt, LayerParams, GENERIC_SCHOOL_LAYER},
    interventions::DailyIntervention,
    population_loader::{ContextSchoolRegistryExt, SchoolRoster, SchoolType},
};

/// Everything the schools intervention needs to know about a run.
#[derive(Debug, Clone, PartialEq)]
pub struct SchoolScenario {
    pub start_date: NaiveDate,
    pub n_days: u32,
    pub quarantine_period: u32,
    /// Parameters of the generic school layer, inherited by every school's layer.
    pub school_layer: LayerParams,
    /// A missing or null entry means schools of that type do not open.
    pub schools: HashMap<SchoolType, Option<SchoolConfig>>,
}

impl SchoolScenario {
    fn config_for(&self, school_type: SchoolType) -> Option<&SchoolConfig> {
        self.schools.get(&school_type).and_then(Option::as_ref)
    }
}

/// The host layer key of a school's contact layer.
#[must_use]
pub fn school_layer_key(school_id: u32) -> String {
    format!("sch_{school_id}")
}

/// Split `pool` into one layer per roster, in roster order. Each layer takes
/// every remaining edge that touches one of its members, so an edge between
/// two schools goes to the first of them.
pub fn partition_school_layer(
    pool: &mut ContactLayer,
    rosters: &[SchoolRoster],
) -> Vec<ContactLayer> {
    rosters
        .iter()
        .map(|roster| {
            let members: IndexSet<PersonId> = roster.members.iter().copied().collect();
            pool.extract_touching(&members)
        })
        .collect()
}

fn warn_on_mismatched_types(scenario: &SchoolScenario, present: &[SchoolType]) {
    for school_type in SchoolType::ALL {
        let configured = scenario.config_for(school_type).is_some();
        let in_population = present.contains(&school_type);
        if configured && !in_population {
            warn!("Schools of type {school_type} are configured but the population has none");
        } else if in_population && !configured {
            warn!("Schools of type {school_type} are in the population but will not open");
        }
    }
}

/// Owns every modeled school and connects them to the host once per day.
pub struct SchoolsManager {
    schools: Vec<School>,
    layer_keys: Vec<String>,
}

impl SchoolsManager {
    /// Partition the generic school layer into per-school layers and create a
    /// school for every school whose type is configured.
    ///
    /// # Errors
    ///
    /// Returns `IxaError` if a school's configuration is invalid, a per-school
    /// layer is already registered, or some generic school contacts are not
    /// touched by any school.
    pub fn new(context: &mut Context, scenario: &SchoolScenario) -> Result<Self, IxaError> {
        let rosters = context.get_school_rosters();
        warn_on_mismatched_types(scenario, &context.get_school_types());

        let mut pool = context.take_static_layer(GENERIC_SCHOOL_LAYER);
        let total_edges = pool.len();
        let layers = partition_school_layer(&mut pool, &rosters);
        if !pool.is_empty() {
            return Err(IxaError::IxaError(format!(
                "{} of {total_edges} school contacts do not involve any enrolled person.",
                pool.len()
            )));
        }

        let mut schools = Vec::new();
        let mut layer_keys = Vec::new();
        for (roster, layer) in rosters.iter().zip(layers) {
            let Some(config) = scenario.config_for(roster.school_type) else {
                trace!(
                    "Dropping {} contacts of closed school {}",
                    layer.len(),
                    roster.school_id
                );
                continue;
            };
            let key = school_layer_key(roster.school_id);
            context.register_layer_params(
                &key,
                LayerParams {
                    beta: config.beta_s.unwrap_or(scenario.school_layer.beta),
                    ..scenario.school_layer
                },
            )?;
            schools.push(School::new(context, roster, config, layer, scenario)?);
            layer_keys.push(key);
        }
        info!(
            "Partitioned {total_edges} school contacts across {} schools, {} of which open",
            rosters.len(),
            schools.len()
        );

        Ok(SchoolsManager {
            schools,
            layer_keys,
        })
    }

    #[must_use]
    pub fn number_of_schools(&self) -> usize {
        self.schools.len()
    }

    #[must_use]
    pub fn get_schools(&self) -> &[School] {
        &self.schools
    }

    /// Update every school for `day` and install each school's layer for today.
    pub fn apply(&mut self, context: &mut Context, day: u32) {
        let mut in_person = 0;
        for (school, key) in self.schools.iter_mut().zip(&self.layer_keys) {
            let layer = school.update(context, day);
            in_person += school.attendance().in_person.len();
            context.install_daily_layer(key, layer);
        }
        debug!(
            "Day {day}: {in_person} people in person across {} schools",
            self.schools.len()
        );
    }

    /// Collect every school's statistics and release the schools.
    pub fn finalize(&mut self, context: &mut Context) {
        let report: SchoolsReport = self
            .schools
            .iter()
            .map(|school| (school.school_id(), school.get_stats()))
            .collect();
        for key in &self.layer_keys {
            context.install_daily_layer(key, ContactLayer::new());
        }
        info!("Collected statistics for {} schools", report.len());
        context.store_school_report(report);
        self.schools.clear();
        self.layer_keys.clear();
    }
}

impl DailyIntervention for SchoolsManager {
    fn apply(&mut self, context: &mut Context, day: u32) {
        SchoolsManager::apply(self, context, day);
    }

    fn finalize(&mut self, context: &mut Context) {
        SchoolsManager::finalize(self, context);
    }

    fn get_name(&self) -> String {
        "schools".to_string()
    }
}
