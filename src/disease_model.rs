//! A small day-stepping disease model that drives the simulation.
//!
//! Each day runs, in order: the host events due today (disease progression
//! and pending diagnoses), the registered daily interventions, transmission
//! over every active contact layer and, on the last day, intervention
//! finalization and reports.
use indexmap::IndexSet;
use ixa::{
    define_rng, trace, warn, Context, ContextPeopleExt, ContextRandomExt, IxaError, PersonId,
};
use rand_distr::Gamma;

use crate::{
    contact_layers::ContextContactLayersExt,
    epidemic_state::{
        ContextEpidemicStateExt, DateExposed, DateSymptomatic, DiseaseStatus, DiseaseStatusValue,
        HostEvent, Symptomatic,
    },
    interventions::{apply_daily_interventions, finalize_daily_interventions},
    parameters::{ContextParametersExt, DiseaseParams},
    reports,
};

define_rng!(DiseaseRng);

/// Period distributions and probabilities for the course of one infection.
#[derive(Debug, Clone)]
pub struct NaturalHistory {
    latent: Gamma<f64>,
    infectious: Gamma<f64>,
    disease: DiseaseParams,
}

impl NaturalHistory {
    /// # Errors
    ///
    /// Returns `IxaError` if a period distribution cannot be built from `disease`.
    pub fn new(disease: &DiseaseParams) -> Result<Self, IxaError> {
        let gamma = |mean: f64| {
            Gamma::new(disease.period_shape, mean / disease.period_shape).map_err(|err| {
                IxaError::IxaError(format!("Invalid period distribution with mean {mean}: {err}"))
            })
        };
        Ok(NaturalHistory {
            latent: gamma(disease.latent_period)?,
            infectious: gamma(disease.infectious_period)?,
            disease: *disease,
        })
    }
}

// Periods are whole days, at least one.
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
fn sample_period_days(context: &Context, distribution: &Gamma<f64>) -> u32 {
    let days: f64 = context.sample_distr(DiseaseRng, distribution);
    (days.ceil() as u32).max(1)
}

/// Expose a person today and schedule the rest of their infection.
pub fn expose_person(context: &mut Context, person_id: PersonId, history: &NaturalHistory) {
    let today = context.current_day();
    context.set_person_property(person_id, DiseaseStatus, DiseaseStatusValue::Exposed);
    context.set_person_property(person_id, DateExposed, Some(today));

    let infectious_day = today.saturating_add(sample_period_days(context, &history.latent));
    let infectious_days = sample_period_days(context, &history.infectious);
    context.schedule_host_event(infectious_day, person_id, HostEvent::BecomeInfectious);

    let onset_delay = history.disease.symptom_onset_delay;
    if onset_delay < infectious_days
        && context.sample_bool(DiseaseRng, history.disease.symptomatic_probability)
    {
        context.schedule_host_event(
            infectious_day.saturating_add(onset_delay),
            person_id,
            HostEvent::SymptomOnset,
        );
    }

    let outcome = if context.sample_bool(DiseaseRng, history.disease.fatality_probability) {
        HostEvent::Die
    } else {
        HostEvent::Recover
    };
    context.schedule_host_event(
        infectious_day.saturating_add(infectious_days),
        person_id,
        outcome,
    );
    trace!("Person {person_id} exposed on day {today}, infectious from day {infectious_day}");
}

fn apply_host_events(context: &mut Context, day: u32) {
    for (person_id, event) in context.take_host_events(day) {
        match event {
            HostEvent::BecomeInfectious => {
                if context.get_person_property(person_id, DiseaseStatus)
                    == DiseaseStatusValue::Exposed
                {
                    context.set_person_property(
                        person_id,
                        DiseaseStatus,
                        DiseaseStatusValue::Infectious,
                    );
                }
            }
            HostEvent::SymptomOnset => {
                if context.is_infectious(person_id) {
                    context.set_person_property(person_id, Symptomatic, true);
                    context.set_person_property(person_id, DateSymptomatic, Some(day));
                }
            }
            HostEvent::Recover => {
                context.set_person_property(person_id, DiseaseStatus, DiseaseStatusValue::Recovered);
                context.set_person_property(person_id, Symptomatic, false);
            }
            HostEvent::Die => {
                context.set_person_property(person_id, DiseaseStatus, DiseaseStatusValue::Dead);
                context.set_person_property(person_id, Symptomatic, false);
            }
            HostEvent::Diagnose => context.diagnose(person_id),
        }
    }
}

/// Transmission over every active layer. Returns the people exposed today.
pub fn transmit(context: &mut Context, history: &NaturalHistory) -> IndexSet<PersonId> {
    let mut exposed = IndexSet::new();
    for (_, params, layer) in context.get_active_layers() {
        for edge in layer.edges() {
            for (source, target) in [(edge.p1, edge.p2), (edge.p2, edge.p1)] {
                if exposed.contains(&target)
                    || !context.is_infectious(source)
                    || !context.is_susceptible(target)
                {
                    continue;
                }
                let mut probability = history.disease.beta * params.beta * edge.weight;
                if context.is_diagnosed(source) {
                    probability *= params.iso_factor;
                }
                if context.sample_bool(DiseaseRng, probability.clamp(0.0, 1.0)) {
                    exposed.insert(target);
                }
            }
        }
    }
    for &person_id in &exposed {
        expose_person(context, person_id, history);
    }
    exposed
}

fn seed_infections(context: &mut Context, initial_infections: usize, history: &NaturalHistory) {
    for _ in 0..initial_infections {
        let Some(person_id) = context.sample_person(
            DiseaseRng,
            (DiseaseStatus, DiseaseStatusValue::Susceptible),
        ) else {
            warn!("Ran out of susceptible people while seeding infections");
            break;
        };
        expose_person(context, person_id, history);
    }
}

/// Run one simulated day.
pub fn step_day(context: &mut Context, day: u32, n_days: u32, history: &NaturalHistory) {
    apply_host_events(context, day);
    apply_daily_interventions(context, day);
    let exposed = transmit(context, history);
    trace!("Day {day}: {} new exposures", exposed.len());
    if day + 1 == n_days {
        finalize_daily_interventions(context);
        reports::send_school_reports(context);
    }
}

fn schedule_day(context: &mut Context, day: u32, n_days: u32, history: NaturalHistory) {
    context.add_plan(f64::from(day), move |context| {
        step_day(context, day, n_days, &history);
        if day + 1 < n_days {
            schedule_day(context, day + 1, n_days, history);
        }
    });
}

/// # Errors
///
/// Returns `IxaError` if the disease parameters do not describe valid
/// period distributions.
pub fn init(context: &mut Context) -> Result<(), IxaError> {
    let params = context.get_params();
    let n_days = params.n_days;
    let initial_infections = params.initial_infections;
    let history = NaturalHistory::new(&params.disease)?;

    let seed_history = history.clone();
    context.add_plan(0.0, move |context| {
        seed_infections(context, initial_infections, &seed_history);
    });
    schedule_day(context, 0, n_days, history);
    Ok(())
}
