//! Per-person epidemic state owned by the host model.
//!
//! Interventions read this state through [`ContextEpidemicStateExt`]. Their only
//! write access is [`ContextEpidemicStateExt::request_test`]; everything else
//! here is changed by the disease model.
use std::collections::BTreeMap;

use ixa::{
    define_data_plugin, define_person_property_with_default, define_rng, trace, Context,
    ContextPeopleExt, ContextRandomExt, PersonId, PluginContext,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiseaseStatusValue {
    Susceptible,
    Exposed,
    Infectious,
    Recovered,
    Dead,
}

define_person_property_with_default!(
    DiseaseStatus,
    DiseaseStatusValue,
    DiseaseStatusValue::Susceptible
);
define_person_property_with_default!(Symptomatic, bool, false);
define_person_property_with_default!(Diagnosed, bool, false);
define_person_property_with_default!(DateExposed, Option<u32>, None);
define_person_property_with_default!(DateSymptomatic, Option<u32>, None);
define_person_property_with_default!(DateDiagnosed, Option<u32>, None);

define_rng!(DiagnosticTestRng);

/// A change to a person's state the host applies at the start of a given day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    BecomeInfectious,
    SymptomOnset,
    Recover,
    Die,
    Diagnose,
}

#[derive(Default)]
struct HostEventQueue {
    by_day: BTreeMap<u32, Vec<(PersonId, HostEvent)>>,
}

define_data_plugin!(HostEventPlugin, HostEventQueue, HostEventQueue::default());

pub trait ContextEpidemicStateExt: PluginContext + ContextPeopleExt + ContextRandomExt {
    /// The index of the simulated day currently being processed.
    #[allow(clippy::cast_possible_truncation)]
    #[allow(clippy::cast_sign_loss)]
    fn current_day(&self) -> u32 {
        self.get_current_time().floor() as u32
    }

    fn is_susceptible(&self, person_id: PersonId) -> bool {
        self.get_person_property(person_id, DiseaseStatus) == DiseaseStatusValue::Susceptible
    }

    fn is_infectious(&self, person_id: PersonId) -> bool {
        self.get_person_property(person_id, DiseaseStatus) == DiseaseStatusValue::Infectious
    }

    fn is_recovered(&self, person_id: PersonId) -> bool {
        self.get_person_property(person_id, DiseaseStatus) == DiseaseStatusValue::Recovered
    }

    fn is_dead(&self, person_id: PersonId) -> bool {
        self.get_person_property(person_id, DiseaseStatus) == DiseaseStatusValue::Dead
    }

    fn is_symptomatic(&self, person_id: PersonId) -> bool {
        self.get_person_property(person_id, Symptomatic)
    }

    fn is_diagnosed(&self, person_id: PersonId) -> bool {
        self.get_person_property(person_id, Diagnosed)
    }

    fn date_exposed(&self, person_id: PersonId) -> Option<u32> {
        self.get_person_property(person_id, DateExposed)
    }

    fn date_symptomatic(&self, person_id: PersonId) -> Option<u32> {
        self.get_person_property(person_id, DateSymptomatic)
    }

    fn date_diagnosed(&self, person_id: PersonId) -> Option<u32> {
        self.get_person_property(person_id, DateDiagnosed)
    }

    /// Queue a state change for the start of `day`.
    fn schedule_host_event(&mut self, day: u32, person_id: PersonId, event: HostEvent) {
        self.get_data_mut(HostEventPlugin)
            .by_day
            .entry(day)
            .or_default()
            .push((person_id, event));
    }

    /// Remove and return every event queued for `day` or earlier, in queue order.
    fn take_host_events(&mut self, day: u32) -> Vec<(PersonId, HostEvent)> {
        let queue = self.get_data_mut(HostEventPlugin);
        let later = queue.by_day.split_off(&(day + 1));
        let due = std::mem::replace(&mut queue.by_day, later);
        due.into_values().flatten().collect()
    }

    /// Mark a person diagnosed today. Diagnosing someone twice keeps the first date.
    fn diagnose(&mut self, person_id: PersonId) {
        if self.is_diagnosed(person_id) {
            return;
        }
        let today = self.current_day();
        self.set_person_property(person_id, Diagnosed, true);
        self.set_person_property(person_id, DateDiagnosed, Some(today));
        trace!("Person {person_id} diagnosed on day {today}");
    }

    /// Run a diagnostic test on `people`. Only people who are infectious and not
    /// yet diagnosed can test positive, each with probability `sensitivity`.
    /// Positives are diagnosed `delay` days from today (immediately when `delay`
    /// is zero). Returns the people who will test positive.
    fn request_test(&mut self, people: &[PersonId], sensitivity: f64, delay: u32) -> Vec<PersonId> {
        let positives: Vec<PersonId> = people
            .iter()
            .copied()
            .filter(|&p| self.is_infectious(p) && !self.is_diagnosed(p))
            .filter(|_| sensitivity >= 1.0 || self.sample_bool(DiagnosticTestRng, sensitivity))
            .collect();

        let today = self.current_day();
        for &person_id in &positives {
            if delay == 0 {
                self.diagnose(person_id);
            } else {
                self.schedule_host_event(
                    today.saturating_add(delay),
                    person_id,
                    HostEvent::Diagnose,
                );
            }
        }
        positives
    }
}

impl ContextEpidemicStateExt for Context {}
