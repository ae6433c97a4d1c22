use chrono::{Duration, NaiveDate};
use indexmap::{IndexMap, IndexSet};
use ixa::{debug, trace, Context, IxaError, PersonId};

use super::{
    binomial_filter,
    contact_manager::{create_contact_manager, ContactManager},
    stats::{Attendance, SchoolStats},
    SchoolConfig, SchoolScenario, SchoolStatsReport, SchoolTesting,
};
use crate::{
    contact_layers::ContactLayer,
    epidemic_state::ContextEpidemicStateExt,
    population_loader::{SchoolRoster, SchoolType},
};

/// One school: its roster, attendance schedule, testing and isolation state.
#[derive(Debug)]
pub struct School {
    school_id: u32,
    school_type: SchoolType,
    config: SchoolConfig,
    sim_start: NaiveDate,
    start_day: u32,
    is_open: bool,
    quarantine_period: u32,
    roster: Vec<PersonId>,
    contact_manager: Box<dyn ContactManager>,
    testing: SchoolTesting,
    stats: SchoolStats,
    /// People kept home and the day each may return.
    uids_at_home: IndexMap<PersonId, u32>,
    attendance: Attendance,
}

impl School {
    pub fn new(
        context: &Context,
        roster: &SchoolRoster,
        config: &SchoolConfig,
        base_layer: ContactLayer,
        scenario: &SchoolScenario,
    ) -> Result<Self, IxaError> {
        let start_day = (config.start_date - scenario.start_date).num_days().max(0);
        let start_day = u32::try_from(start_day).map_err(|_| {
            IxaError::IxaError(format!(
                "School {} opens too far after the start of the simulation.",
                roster.school_id
            ))
        })?;
        let testing = SchoolTesting::new(
            context,
            config.testing.as_deref(),
            &roster.members,
            scenario.start_date,
            scenario.n_days,
            config
                .unconfirmed_antigen_isolation
                .unwrap_or(scenario.quarantine_period),
        )?;
        let contact_manager =
            create_contact_manager(context, config.schedule, &roster.members, base_layer);
        let stats = SchoolStats::new(
            context,
            roster.school_id,
            roster.school_type,
            config.schedule,
            &roster.members,
            scenario.n_days,
        );

        Ok(School {
            school_id: roster.school_id,
            school_type: roster.school_type,
            config: config.clone(),
            sim_start: scenario.start_date,
            start_day,
            is_open: false,
            quarantine_period: scenario.quarantine_period,
            roster: roster.members.clone(),
            contact_manager,
            testing,
            stats,
            uids_at_home: IndexMap::new(),
            attendance: Attendance::default(),
        })
    }

    #[must_use]
    pub fn school_id(&self) -> u32 {
        self.school_id
    }

    #[must_use]
    pub fn school_type(&self) -> SchoolType {
        self.school_type
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.is_open
    }

    #[must_use]
    pub fn roster(&self) -> &[PersonId] {
        &self.roster
    }

    #[must_use]
    pub fn uids_at_home(&self) -> &IndexMap<PersonId, u32> {
        &self.uids_at_home
    }

    /// Attendance on the most recent day the school was updated.
    #[must_use]
    pub fn attendance(&self) -> &Attendance {
        &self.attendance
    }

    /// Keep a person home until `release_day`. A person already home stays
    /// until the later of the two release days.
    pub fn send_home(&mut self, person_id: PersonId, release_day: u32) {
        let release = self.uids_at_home.entry(person_id).or_insert(release_day);
        *release = (*release).max(release_day);
        trace!(
            "School {}: person {person_id} home until day {}",
            self.school_id,
            *release
        );
    }

    /// Advance the school by one day and return the contact layer among the
    /// people who attend.
    pub fn update(&mut self, context: &mut Context, day: u32) -> ContactLayer {
        // Testing runs even before the school opens.
        for (person_id, release) in self.testing.update(context, day) {
            self.send_home(person_id, release);
        }

        if !self.is_open && day >= self.start_day {
            self.is_open = true;
            debug!(
                "School {} ({}) opened on day {day}",
                self.school_id, self.school_type
            );
        }
        if !self.is_open {
            self.attendance = Attendance::default();
            self.stats.update(context, day, false, &self.attendance);
            return ContactLayer::new();
        }

        let quarantine_release = day.saturating_add(self.quarantine_period);
        let newly_diagnosed: IndexSet<PersonId> = self
            .roster
            .iter()
            .copied()
            .filter(|&p| context.date_diagnosed(p) == Some(day))
            .collect();
        for &person_id in &newly_diagnosed {
            self.send_home(person_id, quarantine_release);
        }

        self.uids_at_home.retain(|_, release| *release > day);

        let date = self.sim_start + Duration::days(i64::from(day));
        let scheduled = self.contact_manager.begin_day(date);

        let traced = binomial_filter(context, self.config.trace_prob, &newly_diagnosed);
        let contacts = self.contact_manager.find_contacts(&traced);
        let quarantined = binomial_filter(context, self.config.quar_prob, &contacts);
        for &person_id in &quarantined {
            self.send_home(person_id, quarantine_release);
        }

        let arriving: IndexSet<PersonId> = scheduled
            .iter()
            .copied()
            .filter(|p| !self.uids_at_home.contains_key(p))
            .collect();

        let screen_candidates: Vec<PersonId> = arriving
            .iter()
            .copied()
            .filter(|&p| {
                (context.is_diagnosed(p) || context.is_symptomatic(p))
                    && !(context.is_recovered(p) || context.is_dead(p))
            })
            .collect();
        let mut screened = binomial_filter(context, self.config.screen_prob, &screen_candidates);
        let screen_negative: Vec<PersonId> = arriving
            .iter()
            .copied()
            .filter(|p| !screened.contains(p))
            .collect();
        screened.extend(binomial_filter(context, self.config.ili_prob, &screen_negative));

        let to_test = binomial_filter(context, self.config.screen2pcr, &screened);
        let to_test_list: Vec<PersonId> = to_test.iter().copied().collect();
        let confirmed = context.request_test(&to_test_list, 1.0, self.config.test_delay);
        self.testing.record_pcr_tests(to_test.len());
        for &person_id in &screened {
            if to_test.contains(&person_id) {
                self.send_home(person_id, day.saturating_add(self.config.test_delay));
            } else {
                self.send_home(person_id, quarantine_release);
            }
        }
        // Same-day results were diagnosed after today's diagnosis check.
        if self.config.test_delay == 0 {
            for person_id in confirmed {
                self.send_home(person_id, quarantine_release);
            }
        }

        let at_home: IndexSet<PersonId> = self.uids_at_home.keys().copied().collect();
        let in_person: IndexSet<PersonId> = scheduled
            .iter()
            .copied()
            .filter(|p| !at_home.contains(p))
            .collect();
        self.contact_manager.remove_individuals(&at_home);

        debug!(
            "School {} day {day}: {} scheduled, {} arriving, {} in person, {} diagnosed, {} quarantined, {} screened out",
            self.school_id,
            scheduled.len(),
            arriving.len(),
            in_person.len(),
            newly_diagnosed.len(),
            quarantined.len(),
            screened.len()
        );

        self.attendance = Attendance {
            scheduled,
            arriving,
            in_person,
        };
        self.stats.update(context, day, true, &self.attendance);
        self.contact_manager.get_layer().clone()
    }

    #[must_use]
    pub fn get_stats(&self) -> SchoolStatsReport {
        self.stats.report(
            self.testing.num_pcr_tests(),
            self.testing.num_antigen_tests(),
        )
    }
}
