use std::fmt::Debug;

use chrono::{Datelike, NaiveDate, Weekday};
use indexmap::IndexSet;
use ixa::{Context, ContextPeopleExt, ContextRandomExt, PersonId};
use serde::{Deserialize, Serialize};

use super::SchoolRng;
use crate::{
    contact_layers::ContactLayer,
    population_loader::{RoleGroup, SchoolRole},
};

/// How a school schedules in-person attendance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScheduleKind {
    /// Everyone attends every weekday.
    Full,
    /// Students alternate between two cohorts; Wednesday is a distance day.
    Hybrid,
    /// Nobody attends.
    Remote,
}

/// Decides who is scheduled to attend a school on a given day and maintains
/// the contact layer among them.
pub trait ContactManager: Debug {
    /// Start a new day: reset the working layer and return who is scheduled to attend.
    fn begin_day(&mut self, date: NaiveDate) -> IndexSet<PersonId>;

    /// School contacts of `people`, whether or not those contacts attend today.
    fn find_contacts(&self, people: &IndexSet<PersonId>) -> IndexSet<PersonId>;

    /// Remove `people` from today's working layer.
    fn remove_individuals(&mut self, people: &IndexSet<PersonId>);

    fn get_layer(&self) -> &ContactLayer;
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

#[derive(Debug)]
pub struct FullTimeContactManager {
    roster: IndexSet<PersonId>,
    base_layer: ContactLayer,
    layer: ContactLayer,
}

impl FullTimeContactManager {
    #[must_use]
    pub fn new(roster: &[PersonId], base_layer: ContactLayer) -> Self {
        FullTimeContactManager {
            roster: roster.iter().copied().collect(),
            base_layer,
            layer: ContactLayer::new(),
        }
    }
}

impl ContactManager for FullTimeContactManager {
    fn begin_day(&mut self, date: NaiveDate) -> IndexSet<PersonId> {
        if is_weekend(date) {
            self.layer = ContactLayer::new();
            return IndexSet::new();
        }
        self.layer = self.base_layer.clone();
        self.roster.clone()
    }

    fn find_contacts(&self, people: &IndexSet<PersonId>) -> IndexSet<PersonId> {
        self.base_layer.find_contacts(people)
    }

    fn remove_individuals(&mut self, people: &IndexSet<PersonId>) {
        self.layer.remove_people(people);
    }

    fn get_layer(&self) -> &ContactLayer {
        &self.layer
    }
}

/// Which group a hybrid school schedules on a weekday.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HybridDay {
    CohortA,
    CohortB,
    Distance,
    Weekend,
}

impl HybridDay {
    #[must_use]
    pub fn for_date(date: NaiveDate) -> Self {
        match date.weekday() {
            Weekday::Mon | Weekday::Tue => HybridDay::CohortA,
            Weekday::Wed => HybridDay::Distance,
            Weekday::Thu | Weekday::Fri => HybridDay::CohortB,
            Weekday::Sat | Weekday::Sun => HybridDay::Weekend,
        }
    }
}

#[derive(Debug)]
pub struct HybridContactManager {
    cohort_a_students: IndexSet<PersonId>,
    cohort_b_students: IndexSet<PersonId>,
    // Teachers and staff attend with both cohorts.
    adults: IndexSet<PersonId>,
    layer_a: ContactLayer,
    layer_b: ContactLayer,
    layer: ContactLayer,
}

impl HybridContactManager {
    /// Split the students into two cohorts with a fair coin per student. The
    /// split is fixed for the life of the manager.
    pub fn new(context: &Context, roster: &[PersonId], base_layer: &ContactLayer) -> Self {
        let mut cohort_a_students = IndexSet::new();
        let mut cohort_b_students = IndexSet::new();
        let mut adults = IndexSet::new();
        for &person_id in roster {
            match context.get_person_property(person_id, SchoolRole) {
                Some(RoleGroup::Students) => {
                    if context.sample_bool(SchoolRng, 0.5) {
                        cohort_a_students.insert(person_id);
                    } else {
                        cohort_b_students.insert(person_id);
                    }
                }
                _ => {
                    adults.insert(person_id);
                }
            }
        }

        HybridContactManager {
            layer_a: base_layer.without_people(&cohort_b_students),
            layer_b: base_layer.without_people(&cohort_a_students),
            cohort_a_students,
            cohort_b_students,
            adults,
            layer: ContactLayer::new(),
        }
    }

    #[must_use]
    pub fn cohort_a_students(&self) -> &IndexSet<PersonId> {
        &self.cohort_a_students
    }

    #[must_use]
    pub fn cohort_b_students(&self) -> &IndexSet<PersonId> {
        &self.cohort_b_students
    }

    fn attending(&self, students: &IndexSet<PersonId>) -> IndexSet<PersonId> {
        students.iter().chain(self.adults.iter()).copied().collect()
    }
}

impl ContactManager for HybridContactManager {
    fn begin_day(&mut self, date: NaiveDate) -> IndexSet<PersonId> {
        match HybridDay::for_date(date) {
            HybridDay::CohortA => {
                self.layer = self.layer_a.clone();
                self.attending(&self.cohort_a_students)
            }
            HybridDay::CohortB => {
                self.layer = self.layer_b.clone();
                self.attending(&self.cohort_b_students)
            }
            HybridDay::Distance | HybridDay::Weekend => {
                self.layer = ContactLayer::new();
                IndexSet::new()
            }
        }
    }

    // A contact may last have been present with either cohort.
    fn find_contacts(&self, people: &IndexSet<PersonId>) -> IndexSet<PersonId> {
        let mut contacts = self.layer_a.find_contacts(people);
        contacts.extend(self.layer_b.find_contacts(people));
        contacts
    }

    fn remove_individuals(&mut self, people: &IndexSet<PersonId>) {
        self.layer.remove_people(people);
    }

    fn get_layer(&self) -> &ContactLayer {
        &self.layer
    }
}

/// Fully remote school: nobody is ever scheduled and there is no contact layer.
#[derive(Debug, Default)]
pub struct RemoteContactManager {
    layer: ContactLayer,
}

impl ContactManager for RemoteContactManager {
    fn begin_day(&mut self, _date: NaiveDate) -> IndexSet<PersonId> {
        IndexSet::new()
    }

    fn find_contacts(&self, _people: &IndexSet<PersonId>) -> IndexSet<PersonId> {
        IndexSet::new()
    }

    fn remove_individuals(&mut self, _people: &IndexSet<PersonId>) {}

    fn get_layer(&self) -> &ContactLayer {
        &self.layer
    }
}

#[must_use]
pub fn create_contact_manager(
    context: &Context,
    schedule: ScheduleKind,
    roster: &[PersonId],
    base_layer: ContactLayer,
) -> Box<dyn ContactManager> {
    match schedule {
        ScheduleKind::Full => Box::new(FullTimeContactManager::new(roster, base_layer)),
        ScheduleKind::Hybrid => Box::new(HybridContactManager::new(context, roster, &base_layer)),
        ScheduleKind::Remote => Box::new(RemoteContactManager::default()),
    }
}
