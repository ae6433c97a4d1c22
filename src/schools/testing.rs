use chrono::NaiveDate;
use indexmap::{IndexMap, IndexSet};
use ixa::{debug, Context, ContextPeopleExt, IxaError, PersonId};
use serde::{Deserialize, Serialize};

use super::binomial_filter;
use crate::{
    epidemic_state::ContextEpidemicStateExt,
    parameters::validate_probability,
    population_loader::{RoleGroup, SchoolRole},
};

// Antigen tests are more sensitive in people whose symptoms started less than
// this many days ago.
const RECENT_SYMPTOM_WINDOW: u32 = 7;

fn default_followup_sensitivity() -> f64 {
    1.0
}

/// An organized testing campaign run on a school's community.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TestingCampaign {
    Pcr {
        /// First (or only) day of testing.
        start_date: NaiveDate,
        /// Days between rounds. A campaign without a repeat interval runs once.
        #[serde(default)]
        repeat: Option<u32>,
        groups: Vec<RoleGroup>,
        /// Probability each eligible person is tested in a round.
        coverage: f64,
        sensitivity: f64,
        /// Days until results are available.
        delay: u32,
    },
    Antigen {
        start_date: NaiveDate,
        #[serde(default)]
        repeat: Option<u32>,
        groups: Vec<RoleGroup>,
        coverage: f64,
        /// Sensitivity for people whose symptoms began in the last week.
        symp7d_sensitivity: f64,
        /// Sensitivity for every other infectious person.
        other_sensitivity: f64,
        specificity: f64,
        /// Fraction of antigen positives sent for a confirmatory PCR test.
        pcr_followup_perc: f64,
        pcr_followup_delay: u32,
        #[serde(default = "default_followup_sensitivity")]
        pcr_followup_sensitivity: f64,
    },
}

impl TestingCampaign {
    #[must_use]
    pub fn start_date(&self) -> NaiveDate {
        match self {
            TestingCampaign::Pcr { start_date, .. } | TestingCampaign::Antigen { start_date, .. } => {
                *start_date
            }
        }
    }

    #[must_use]
    pub fn repeat(&self) -> Option<u32> {
        match self {
            TestingCampaign::Pcr { repeat, .. } | TestingCampaign::Antigen { repeat, .. } => {
                *repeat
            }
        }
    }

    #[must_use]
    pub fn groups(&self) -> &[RoleGroup] {
        match self {
            TestingCampaign::Pcr { groups, .. } | TestingCampaign::Antigen { groups, .. } => groups,
        }
    }

    #[must_use]
    pub fn coverage(&self) -> f64 {
        match self {
            TestingCampaign::Pcr { coverage, .. } | TestingCampaign::Antigen { coverage, .. } => {
                *coverage
            }
        }
    }

    pub fn validate(&self) -> Result<(), IxaError> {
        if self.repeat() == Some(0) {
            return Err(IxaError::IxaError(
                "A testing campaign's repeat interval must be at least one day.".to_string(),
            ));
        }
        validate_probability("testing coverage", self.coverage())?;
        match self {
            TestingCampaign::Pcr { sensitivity, .. } => {
                validate_probability("PCR sensitivity", *sensitivity)?;
            }
            TestingCampaign::Antigen {
                symp7d_sensitivity,
                other_sensitivity,
                specificity,
                pcr_followup_perc,
                pcr_followup_sensitivity,
                ..
            } => {
                validate_probability("antigen sensitivity (recent symptoms)", *symp7d_sensitivity)?;
                validate_probability("antigen sensitivity", *other_sensitivity)?;
                validate_probability("antigen specificity", *specificity)?;
                validate_probability("PCR follow-up fraction", *pcr_followup_perc)?;
                validate_probability("PCR follow-up sensitivity", *pcr_followup_sensitivity)?;
            }
        }
        Ok(())
    }
}

/// Simulation days on which a campaign runs. Rounds before day 0 are skipped
/// and rounds are bounded by the length of the run.
fn trigger_days(campaign: &TestingCampaign, sim_start: NaiveDate, n_days: u32) -> IndexSet<u32> {
    let first = (campaign.start_date() - sim_start).num_days();
    let last = i64::from(n_days);
    let candidates: Vec<i64> = match campaign.repeat() {
        None => vec![first],
        Some(repeat) => (0..)
            .map(|round| first + round * i64::from(repeat))
            .take_while(|day| *day < last)
            .collect(),
    };
    candidates
        .into_iter()
        .filter(|day| (0..last).contains(day))
        .filter_map(|day| u32::try_from(day).ok())
        .collect()
}

#[derive(Debug)]
struct ScheduledCampaign {
    campaign: TestingCampaign,
    days: IndexSet<u32>,
    targets: Vec<PersonId>,
}

/// Runs one school's testing campaigns.
#[derive(Debug)]
pub struct SchoolTesting {
    campaigns: Vec<ScheduledCampaign>,
    unconfirmed_isolation: u32,
    num_pcr_tests: usize,
    num_antigen_tests: usize,
}

impl SchoolTesting {
    /// Resolve each campaign's trigger days and target people up front. Both
    /// are fixed for the rest of the run.
    pub fn new(
        context: &Context,
        campaigns: Option<&[TestingCampaign]>,
        roster: &[PersonId],
        sim_start: NaiveDate,
        n_days: u32,
        unconfirmed_isolation: u32,
    ) -> Result<Self, IxaError> {
        let mut scheduled = Vec::new();
        for campaign in campaigns.unwrap_or_default() {
            campaign.validate()?;
            let groups = campaign.groups();
            let targets = roster
                .iter()
                .copied()
                .filter(|&p| {
                    context
                        .get_person_property(p, SchoolRole)
                        .is_some_and(|role| groups.contains(&role))
                })
                .collect();
            scheduled.push(ScheduledCampaign {
                days: trigger_days(campaign, sim_start, n_days),
                campaign: campaign.clone(),
                targets,
            });
        }
        Ok(SchoolTesting {
            campaigns: scheduled,
            unconfirmed_isolation,
            num_pcr_tests: 0,
            num_antigen_tests: 0,
        })
    }

    /// Run every campaign scheduled for `day`. Returns the people who must stay
    /// home and the day each may return.
    pub fn update(&mut self, context: &mut Context, day: u32) -> IndexMap<PersonId, u32> {
        let mut directives = IndexMap::new();
        for index in 0..self.campaigns.len() {
            let scheduled = &self.campaigns[index];
            if !scheduled.days.contains(&day) {
                continue;
            }
            let campaign = scheduled.campaign.clone();
            let eligible: Vec<PersonId> = scheduled
                .targets
                .iter()
                .copied()
                .filter(|&p| !context.is_diagnosed(p))
                .collect();
            let tested: Vec<PersonId> = binomial_filter(context, campaign.coverage(), &eligible)
                .into_iter()
                .collect();

            match campaign {
                TestingCampaign::Pcr {
                    sensitivity, delay, ..
                } => {
                    self.num_pcr_tests += tested.len();
                    let positives = context.request_test(&tested, sensitivity, delay);
                    debug!(
                        "Day {day}: {} PCR tests, {} positive",
                        tested.len(),
                        positives.len()
                    );
                }
                TestingCampaign::Antigen {
                    symp7d_sensitivity,
                    other_sensitivity,
                    specificity,
                    pcr_followup_perc,
                    pcr_followup_delay,
                    pcr_followup_sensitivity,
                    ..
                } => {
                    self.num_antigen_tests += tested.len();
                    let positives = antigen_positives(
                        context,
                        day,
                        &tested,
                        symp7d_sensitivity,
                        other_sensitivity,
                        specificity,
                    );

                    let followup = binomial_filter(context, pcr_followup_perc, &positives);
                    let followup_list: Vec<PersonId> = followup.iter().copied().collect();
                    context.request_test(
                        &followup_list,
                        pcr_followup_sensitivity,
                        pcr_followup_delay,
                    );
                    self.num_pcr_tests += followup.len();

                    for &person_id in &positives {
                        let release = if followup.contains(&person_id) {
                            day.saturating_add(pcr_followup_delay)
                        } else {
                            day.saturating_add(self.unconfirmed_isolation)
                        };
                        merge_release(&mut directives, person_id, release);
                    }
                    debug!(
                        "Day {day}: {} antigen tests, {} positive, {} sent for PCR",
                        tested.len(),
                        positives.len(),
                        followup.len()
                    );
                }
            }
        }
        directives
    }

    pub fn record_pcr_tests(&mut self, n: usize) {
        self.num_pcr_tests += n;
    }

    #[must_use]
    pub fn num_pcr_tests(&self) -> usize {
        self.num_pcr_tests
    }

    #[must_use]
    pub fn num_antigen_tests(&self) -> usize {
        self.num_antigen_tests
    }

    #[must_use]
    pub fn number_of_campaigns(&self) -> usize {
        self.campaigns.len()
    }
}

fn merge_release(directives: &mut IndexMap<PersonId, u32>, person_id: PersonId, release: u32) {
    let entry = directives.entry(person_id).or_insert(release);
    *entry = (*entry).max(release);
}

// True positives come from infectious people only; false positives from
// everyone else tested.
fn antigen_positives(
    context: &Context,
    day: u32,
    tested: &[PersonId],
    symp7d_sensitivity: f64,
    other_sensitivity: f64,
    specificity: f64,
) -> IndexSet<PersonId> {
    let mut recent_symptoms = Vec::new();
    let mut other_infectious = Vec::new();
    let mut not_infectious = Vec::new();
    for &person_id in tested {
        if !context.is_infectious(person_id) {
            not_infectious.push(person_id);
        } else if context.is_symptomatic(person_id)
            && context
                .date_symptomatic(person_id)
                .is_some_and(|d| day.saturating_sub(d) < RECENT_SYMPTOM_WINDOW)
        {
            recent_symptoms.push(person_id);
        } else {
            other_infectious.push(person_id);
        }
    }

    let mut positives = binomial_filter(context, symp7d_sensitivity, &recent_symptoms);
    positives.extend(binomial_filter(context, other_sensitivity, &other_infectious));
    positives.extend(binomial_filter(context, 1.0 - specificity, &not_infectious));
    positives
}

#[cfg(test)]
mod test {
    use chrono::{Duration, NaiveDate};
    use ixa::{Context, ContextPeopleExt, ContextRandomExt, PersonId};

    use super::{trigger_days, SchoolTesting, TestingCampaign};
    use crate::{
        epidemic_state::{
            ContextEpidemicStateExt, DateSymptomatic, DiseaseStatus, DiseaseStatusValue,
            HostEvent, Symptomatic,
        },
        population_loader::{RoleGroup, SchoolRole},
    };

    fn sim_start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 11, 2).unwrap()
    }

    fn pcr(repeat: Option<u32>, groups: Vec<RoleGroup>) -> TestingCampaign {
        TestingCampaign::Pcr {
            start_date: sim_start(),
            repeat,
            groups,
            coverage: 1.0,
            sensitivity: 1.0,
            delay: 0,
        }
    }

    fn antigen(specificity: f64, pcr_followup_perc: f64) -> TestingCampaign {
        TestingCampaign::Antigen {
            start_date: sim_start(),
            repeat: None,
            groups: vec![RoleGroup::Students, RoleGroup::Teachers, RoleGroup::Staff],
            coverage: 1.0,
            symp7d_sensitivity: 1.0,
            other_sensitivity: 1.0,
            specificity,
            pcr_followup_perc,
            pcr_followup_delay: 2,
            pcr_followup_sensitivity: 1.0,
        }
    }

    fn add_people(context: &mut Context, role: RoleGroup, n: usize) -> Vec<PersonId> {
        (0..n)
            .map(|_| context.add_person((SchoolRole, Some(role))).unwrap())
            .collect()
    }

    fn make_infectious(context: &mut Context, people: &[PersonId]) {
        for &p in people {
            context.set_person_property(p, DiseaseStatus, DiseaseStatusValue::Infectious);
        }
    }

    #[test]
    fn test_trigger_days() {
        let start = sim_start();
        assert_eq!(
            trigger_days(&pcr(None, vec![]), start, 10)
                .into_iter()
                .collect::<Vec<_>>(),
            vec![0]
        );
        assert_eq!(
            trigger_days(&pcr(Some(4), vec![]), start, 10)
                .into_iter()
                .collect::<Vec<_>>(),
            vec![0, 4, 8]
        );

        // A campaign that started before the run only keeps its later rounds.
        let early = TestingCampaign::Pcr {
            start_date: start - Duration::days(3),
            repeat: Some(7),
            groups: vec![],
            coverage: 1.0,
            sensitivity: 1.0,
            delay: 0,
        };
        assert_eq!(
            trigger_days(&early, start, 20)
                .into_iter()
                .collect::<Vec<_>>(),
            vec![4, 11, 18]
        );

        // One-shot campaigns after the end of the run never trigger.
        let late = TestingCampaign::Pcr {
            start_date: start + Duration::days(30),
            repeat: None,
            groups: vec![],
            coverage: 1.0,
            sensitivity: 1.0,
            delay: 0,
        };
        assert!(trigger_days(&late, start, 20).is_empty());
    }

    #[test]
    fn test_pcr_targets_only_named_groups() {
        let mut context = Context::new();
        context.init_random(1);
        let students = add_people(&mut context, RoleGroup::Students, 5);
        let teachers = add_people(&mut context, RoleGroup::Teachers, 3);
        let roster: Vec<PersonId> = students.iter().chain(teachers.iter()).copied().collect();
        make_infectious(&mut context, &roster);

        let campaigns = vec![pcr(None, vec![RoleGroup::Teachers])];
        let mut testing =
            SchoolTesting::new(&context, Some(&campaigns), &roster, sim_start(), 10, 14).unwrap();
        let directives = testing.update(&mut context, 0);

        assert!(directives.is_empty());
        assert_eq!(testing.num_pcr_tests(), 3);
        for &t in &teachers {
            assert!(context.is_diagnosed(t));
        }
        for &s in &students {
            assert!(!context.is_diagnosed(s));
        }
    }

    #[test]
    fn test_pcr_has_no_false_positives() {
        let mut context = Context::new();
        context.init_random(2);
        let roster = add_people(&mut context, RoleGroup::Students, 20);
        make_infectious(&mut context, &roster[..5]);

        let campaigns = vec![pcr(None, vec![RoleGroup::Students])];
        let mut testing =
            SchoolTesting::new(&context, Some(&campaigns), &roster, sim_start(), 10, 14).unwrap();
        testing.update(&mut context, 0);

        for (i, &p) in roster.iter().enumerate() {
            assert_eq!(context.is_diagnosed(p), i < 5);
        }
    }

    #[test]
    fn test_diagnosed_people_are_not_retested() {
        let mut context = Context::new();
        context.init_random(3);
        let roster = add_people(&mut context, RoleGroup::Staff, 6);
        make_infectious(&mut context, &roster);
        context.diagnose(roster[0]);
        context.diagnose(roster[1]);

        let campaigns = vec![pcr(Some(1), vec![RoleGroup::Staff])];
        let mut testing =
            SchoolTesting::new(&context, Some(&campaigns), &roster, sim_start(), 10, 14).unwrap();
        testing.update(&mut context, 0);
        assert_eq!(testing.num_pcr_tests(), 4);

        // Everyone is diagnosed now, so the next round tests nobody.
        context.add_plan(1.0, move |context| {
            testing.update(context, 1);
            assert_eq!(testing.num_pcr_tests(), 4);
        });
        context.execute();
    }

    #[test]
    fn test_no_campaigns_is_a_no_op() {
        let mut context = Context::new();
        context.init_random(4);
        let roster = add_people(&mut context, RoleGroup::Students, 3);
        let mut testing = SchoolTesting::new(&context, None, &roster, sim_start(), 10, 14).unwrap();
        assert_eq!(testing.number_of_campaigns(), 0);
        assert!(testing.update(&mut context, 0).is_empty());
        assert_eq!(testing.num_pcr_tests() + testing.num_antigen_tests(), 0);
    }

    #[test]
    fn test_empty_target_roster() {
        let mut context = Context::new();
        context.init_random(5);
        let roster = add_people(&mut context, RoleGroup::Students, 3);
        let campaigns = vec![pcr(None, vec![RoleGroup::Teachers])];
        let mut testing =
            SchoolTesting::new(&context, Some(&campaigns), &roster, sim_start(), 10, 14).unwrap();
        assert!(testing.update(&mut context, 0).is_empty());
        assert_eq!(testing.num_pcr_tests(), 0);
    }

    #[test]
    fn test_antigen_false_positives_only_from_non_infectious() {
        let mut context = Context::new();
        context.init_random(6);
        let roster = add_people(&mut context, RoleGroup::Students, 10);
        make_infectious(&mut context, &roster[..2]);

        let zero_sensitivity = TestingCampaign::Antigen {
            start_date: sim_start(),
            repeat: None,
            groups: vec![RoleGroup::Students],
            coverage: 1.0,
            symp7d_sensitivity: 0.0,
            other_sensitivity: 0.0,
            specificity: 0.0,
            pcr_followup_perc: 0.0,
            pcr_followup_delay: 2,
            pcr_followup_sensitivity: 1.0,
        };
        let campaigns = vec![zero_sensitivity];
        let mut testing =
            SchoolTesting::new(&context, Some(&campaigns), &roster, sim_start(), 10, 14).unwrap();
        let directives = testing.update(&mut context, 0);

        assert_eq!(testing.num_antigen_tests(), 10);
        assert_eq!(testing.num_pcr_tests(), 0);
        assert_eq!(directives.len(), 8);
        for &p in &roster[..2] {
            assert!(!directives.contains_key(&p));
        }
        // Unconfirmed positives stay home for the unconfirmed isolation period.
        assert!(directives.values().all(|&release| release == 14));
        assert!(roster.iter().all(|&p| !context.is_diagnosed(p)));
    }

    #[test]
    fn test_antigen_followup_pcr() {
        let mut context = Context::new();
        context.init_random(7);
        let roster = add_people(&mut context, RoleGroup::Teachers, 4);
        make_infectious(&mut context, &roster[..1]);
        context.set_person_property(roster[0], Symptomatic, true);
        context.set_person_property(roster[0], DateSymptomatic, Some(0));

        let campaigns = vec![antigen(1.0, 1.0)];
        let mut testing =
            SchoolTesting::new(&context, Some(&campaigns), &roster, sim_start(), 10, 5).unwrap();
        let directives = testing.update(&mut context, 0);

        assert_eq!(directives.len(), 1);
        assert_eq!(directives[&roster[0]], 2);
        assert_eq!(testing.num_antigen_tests(), 4);
        assert_eq!(testing.num_pcr_tests(), 1);
        // The confirmatory result arrives after the follow-up delay.
        assert!(!context.is_diagnosed(roster[0]));
        assert_eq!(
            context.take_host_events(2),
            vec![(roster[0], HostEvent::Diagnose)]
        );
    }

    #[test]
    fn test_unconfirmed_isolation_is_configurable() {
        let mut context = Context::new();
        context.init_random(8);
        let roster = add_people(&mut context, RoleGroup::Students, 3);
        make_infectious(&mut context, &roster);

        let campaigns = vec![antigen(1.0, 0.0)];
        let mut testing =
            SchoolTesting::new(&context, Some(&campaigns), &roster, sim_start(), 10, 3).unwrap();
        let directives = testing.update(&mut context, 0);
        assert_eq!(directives.len(), 3);
        assert!(directives.values().all(|&release| release == 3));
    }

    #[test]
    fn test_long_antigen_isolation_saturates() {
        let mut context = Context::new();
        context.init_random(12);
        let roster = add_people(&mut context, RoleGroup::Students, 4);
        make_infectious(&mut context, &roster);

        let campaigns = vec![TestingCampaign::Antigen {
            start_date: sim_start() + Duration::days(3),
            repeat: None,
            groups: vec![RoleGroup::Students],
            coverage: 1.0,
            symp7d_sensitivity: 1.0,
            other_sensitivity: 1.0,
            specificity: 1.0,
            pcr_followup_perc: 0.5,
            pcr_followup_delay: u32::MAX,
            pcr_followup_sensitivity: 1.0,
        }];
        let mut testing =
            SchoolTesting::new(&context, Some(&campaigns), &roster, sim_start(), 10, u32::MAX)
                .unwrap();
        let directives = testing.update(&mut context, 3);
        assert_eq!(directives.len(), 4);
        assert!(directives.values().all(|&release| release == u32::MAX));
    }

    #[test]
    fn test_campaign_runs_only_on_trigger_days() {
        let mut context = Context::new();
        context.init_random(9);
        let roster = add_people(&mut context, RoleGroup::Students, 4);
        let campaigns = vec![pcr(Some(3), vec![RoleGroup::Students])];
        let mut testing =
            SchoolTesting::new(&context, Some(&campaigns), &roster, sim_start(), 10, 14).unwrap();
        for day in 0..10 {
            testing.update(&mut context, day);
        }
        // Rounds on days 0, 3, 6 and 9.
        assert_eq!(testing.num_pcr_tests(), 16);
    }

    #[test]
    fn test_invalid_campaigns_rejected() {
        let mut context = Context::new();
        let roster = add_people(&mut context, RoleGroup::Students, 1);
        let bad_repeat = vec![pcr(Some(0), vec![RoleGroup::Students])];
        assert!(
            SchoolTesting::new(&context, Some(&bad_repeat), &roster, sim_start(), 10, 14).is_err()
        );
        let bad_specificity = vec![antigen(1.5, 0.0)];
        assert!(SchoolTesting::new(
            &context,
            Some(&bad_specificity),
            &roster,
            sim_start(),
            10,
            14
        )
        .is_err());
    }

    #[test]
    fn test_parse_campaigns() {
        let json = r#"[
            {"type": "Pcr", "start_date": "2020-11-02", "repeat": 7,
             "groups": ["teachers", "staff"], "coverage": 0.8, "sensitivity": 0.9, "delay": 1},
            {"type": "Antigen", "start_date": "2020-11-09", "groups": ["students"],
             "coverage": 0.5, "symp7d_sensitivity": 0.9, "other_sensitivity": 0.6,
             "specificity": 0.99, "pcr_followup_perc": 0.5, "pcr_followup_delay": 2}
        ]"#;
        let campaigns: Vec<TestingCampaign> = serde_json::from_str(json).unwrap();
        assert_eq!(campaigns[0].repeat(), Some(7));
        assert_eq!(
            campaigns[0].groups(),
            &[RoleGroup::Teachers, RoleGroup::Staff]
        );
        assert_eq!(campaigns[1].repeat(), None);
        match &campaigns[1] {
            TestingCampaign::Antigen {
                pcr_followup_sensitivity,
                ..
            } => assert!((pcr_followup_sensitivity - 1.0).abs() < f64::EPSILON),
            TestingCampaign::Pcr { .. } => panic!("expected an antigen campaign"),
        }

        // Antigen campaigns need their specificity.
        let missing = r#"{"type": "Antigen", "start_date": "2020-11-09", "groups": [],
            "coverage": 0.5, "symp7d_sensitivity": 0.9, "other_sensitivity": 0.6,
            "pcr_followup_perc": 0.5, "pcr_followup_delay": 2}"#;
        assert!(serde_json::from_str::<TestingCampaign>(missing).is_err());
    }
}
