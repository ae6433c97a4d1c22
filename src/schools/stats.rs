use std::collections::BTreeMap;

use indexmap::IndexSet;
use ixa::{Context, ContextPeopleExt, PersonId};
use serde::Serialize;

use super::ScheduleKind;
use crate::{
    epidemic_state::ContextEpidemicStateExt,
    population_loader::{RoleGroup, SchoolRole, SchoolType},
};

/// Daily counts for one role group, indexed by simulation day.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GroupSeries {
    pub infectious: Vec<usize>,
    /// Infectious people who arrived at school, before screening.
    pub infectious_arrive: Vec<usize>,
    /// Infectious people who passed screening and attended.
    pub infectious_stay: Vec<usize>,
    /// People exposed on the previous day, wherever that happened.
    pub newly_exposed: Vec<usize>,
    pub scheduled: Vec<usize>,
    pub in_person: Vec<usize>,
}

impl GroupSeries {
    fn with_days(n_days: usize) -> Self {
        GroupSeries {
            infectious: vec![0; n_days],
            infectious_arrive: vec![0; n_days],
            infectious_stay: vec![0; n_days],
            newly_exposed: vec![0; n_days],
            scheduled: vec![0; n_days],
            in_person: vec![0; n_days],
        }
    }
}

/// Who a school expected, who showed up and who stayed on one day.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attendance {
    pub scheduled: IndexSet<PersonId>,
    pub arriving: IndexSet<PersonId>,
    pub in_person: IndexSet<PersonId>,
}

/// Statistics for one school, as reported at the end of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchoolStatsReport {
    pub school_id: u32,
    pub school_type: SchoolType,
    pub schedule: ScheduleKind,
    /// Enrolled people per role group.
    pub num: BTreeMap<RoleGroup, usize>,
    pub series: BTreeMap<RoleGroup, GroupSeries>,
    pub num_school_days: usize,
    pub num_pcr_tests: usize,
    pub num_antigen_tests: usize,
}

/// Every school's report, by school id.
pub type SchoolsReport = BTreeMap<u32, SchoolStatsReport>;

#[derive(Debug)]
pub struct SchoolStats {
    school_id: u32,
    school_type: SchoolType,
    schedule: ScheduleKind,
    members: BTreeMap<RoleGroup, Vec<PersonId>>,
    series: BTreeMap<RoleGroup, GroupSeries>,
    n_days: usize,
    num_school_days: usize,
}

impl SchoolStats {
    #[must_use]
    pub fn new(
        context: &Context,
        school_id: u32,
        school_type: SchoolType,
        schedule: ScheduleKind,
        roster: &[PersonId],
        n_days: u32,
    ) -> Self {
        let mut members: BTreeMap<RoleGroup, Vec<PersonId>> =
            RoleGroup::ALL.into_iter().map(|g| (g, Vec::new())).collect();
        for &person_id in roster {
            if let Some(group) = context.get_person_property(person_id, SchoolRole) {
                members.entry(group).or_default().push(person_id);
            }
        }
        let n_days = n_days as usize;
        let series = RoleGroup::ALL
            .into_iter()
            .map(|g| (g, GroupSeries::with_days(n_days)))
            .collect();
        SchoolStats {
            school_id,
            school_type,
            schedule,
            members,
            series,
            n_days,
            num_school_days: 0,
        }
    }

    /// Record the counts for `day`. Days past the end of the run are ignored.
    pub fn update(&mut self, context: &Context, day: u32, is_open: bool, attendance: &Attendance) {
        let index = day as usize;
        if index >= self.n_days {
            return;
        }
        let yesterday = day.checked_sub(1);
        for (group, members) in &self.members {
            let Some(series) = self.series.get_mut(group) else {
                continue;
            };
            let infectious: Vec<PersonId> = members
                .iter()
                .copied()
                .filter(|&p| context.is_infectious(p))
                .collect();
            series.infectious[index] = infectious.len();
            series.infectious_arrive[index] = infectious
                .iter()
                .filter(|p| attendance.arriving.contains(*p))
                .count();
            series.infectious_stay[index] = infectious
                .iter()
                .filter(|p| attendance.in_person.contains(*p))
                .count();
            series.newly_exposed[index] = match yesterday {
                Some(yesterday) => members
                    .iter()
                    .filter(|&&p| context.date_exposed(p) == Some(yesterday))
                    .count(),
                None => 0,
            };
            series.scheduled[index] = members
                .iter()
                .filter(|p| attendance.scheduled.contains(*p))
                .count();
            series.in_person[index] = members
                .iter()
                .filter(|p| attendance.in_person.contains(*p))
                .count();
        }
        if is_open && !attendance.scheduled.is_empty() {
            self.num_school_days += 1;
        }
    }

    #[must_use]
    pub fn num_school_days(&self) -> usize {
        self.num_school_days
    }

    #[must_use]
    pub fn get_series(&self, group: RoleGroup) -> Option<&GroupSeries> {
        self.series.get(&group)
    }

    #[must_use]
    pub fn report(&self, num_pcr_tests: usize, num_antigen_tests: usize) -> SchoolStatsReport {
        SchoolStatsReport {
            school_id: self.school_id,
            school_type: self.school_type,
            schedule: self.schedule,
            num: self
                .members
                .iter()
                .map(|(group, members)| (*group, members.len()))
                .collect(),
            series: self.series.clone(),
            num_school_days: self.num_school_days,
            num_pcr_tests,
            num_antigen_tests,
        }
    }
}
