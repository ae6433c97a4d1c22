//! Whole-run checks of the schools intervention driven by the disease model.
use std::{cell::RefCell, collections::HashMap, rc::Rc};

use chrono::NaiveDate;
use indexmap::IndexSet;
use ixa::{Context, ContextGlobalPropertiesExt, ContextPeopleExt, ContextRandomExt, PersonId};

use super::{
    manager::{partition_school_layer, school_layer_key},
    test::base_config,
    ContextSchoolsExt, ScheduleKind, SchoolConfig, SchoolScenario, SchoolsManager,
};
use crate::{
    contact_layers::{ContactLayer, ContextContactLayersExt, LayerParams, GENERIC_SCHOOL_LAYER},
    disease_model,
    epidemic_state::ContextEpidemicStateExt,
    interventions::{ContextInterventionExt, DailyIntervention},
    parameters::{DiseaseParams, Parameters, Params},
    population_loader::{Age, ContextSchoolRegistryExt, RoleGroup, SchoolRole, SchoolType},
};

fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 11, 2).unwrap()
}

// Each school has `n_students` students in a ring, one teacher and one staff
// member connected to every student. Neighboring schools share one edge.
fn build_population(
    context: &mut Context,
    schools: &[(SchoolType, u32, usize)],
) -> ContactLayer {
    let mut layer = ContactLayer::new();
    let mut previous_school: Option<PersonId> = None;
    for &(school_type, school_id, n_students) in schools {
        let mut students = Vec::new();
        for _ in 0..n_students {
            let p = context
                .add_person(((Age, 12), (SchoolRole, Some(RoleGroup::Students))))
                .unwrap();
            context.add_school_member(school_type, school_id, p).unwrap();
            students.push(p);
        }
        for i in 0..n_students {
            layer.add_edge(students[i], students[(i + 1) % n_students], 1.0);
        }
        for role in [RoleGroup::Teachers, RoleGroup::Staff] {
            let adult = context
                .add_person(((Age, 40), (SchoolRole, Some(role))))
                .unwrap();
            context.add_school_member(school_type, school_id, adult).unwrap();
            for &s in &students {
                layer.add_edge(adult, s, 1.0);
            }
        }
        if let Some(other) = previous_school {
            layer.add_edge(other, students[0], 1.0);
        }
        previous_school = Some(students[0]);
    }
    layer
}

fn run_params(n_days: u32, schools: HashMap<SchoolType, Option<SchoolConfig>>) -> Params {
    Params {
        n_days,
        start_date: monday(),
        quarantine_period: 10,
        initial_infections: 0,
        disease: DiseaseParams {
            beta: 0.0,
            ..DiseaseParams::default()
        },
        schools,
        ..Params::default()
    }
}

type Check = Box<dyn FnMut(&Context, u32, &SchoolsManager)>;

// Runs the schools intervention and inspects every school after each update,
// before that day's transmission.
struct Observed {
    manager: SchoolsManager,
    check: Check,
}

impl DailyIntervention for Observed {
    fn apply(&mut self, context: &mut Context, day: u32) {
        self.manager.apply(context, day);
        (self.check)(context, day, &self.manager);
    }

    fn finalize(&mut self, context: &mut Context) {
        self.manager.finalize(context);
    }

    fn get_name(&self) -> String {
        "observed schools".to_string()
    }
}

fn setup_run(
    seed: u64,
    params: Params,
    schools: &[(SchoolType, u32, usize)],
    check: Check,
) -> Context {
    let mut context = Context::new();
    context.init_random(seed);
    let layer = build_population(&mut context, schools);
    context
        .register_layer_params(GENERIC_SCHOOL_LAYER, params.school_layer)
        .unwrap();
    context.set_static_layer(GENERIC_SCHOOL_LAYER, layer);
    context
        .set_global_property_value(Parameters, params.clone())
        .unwrap();

    let manager = SchoolsManager::new(&mut context, &SchoolScenario::from_params(&params)).unwrap();
    context.register_daily_intervention(Observed { manager, check });
    disease_model::init(&mut context).unwrap();
    context
}

#[test]
fn test_partition_is_complete() {
    let mut context = Context::new();
    context.init_random(1);
    let schools = [
        (SchoolType::Elementary, 1, 6),
        (SchoolType::Middle, 2, 5),
        (SchoolType::High, 3, 4),
    ];
    let original = build_population(&mut context, &schools);

    let mut pool = original.clone();
    let layers = partition_school_layer(&mut pool, &context.get_school_rosters());
    assert!(pool.is_empty());
    assert_eq!(
        layers.iter().map(ContactLayer::len).sum::<usize>(),
        original.len()
    );
    for edge in original.edges() {
        let copies = layers
            .iter()
            .flat_map(|layer| layer.edges())
            .filter(|other| *other == edge)
            .count();
        assert_eq!(copies, 1);
    }

    // Closed school types lose their edges; open ones get exactly their partition.
    context.set_static_layer(GENERIC_SCHOOL_LAYER, original);
    let scenario = SchoolScenario {
        start_date: monday(),
        n_days: 5,
        quarantine_period: 10,
        school_layer: LayerParams::default(),
        schools: HashMap::from([
            (SchoolType::Elementary, Some(base_config())),
            (SchoolType::Middle, None),
            (SchoolType::High, Some(base_config())),
        ]),
    };
    let mut manager = SchoolsManager::new(&mut context, &scenario).unwrap();
    manager.apply(&mut context, 0);
    assert_eq!(context.get_daily_layer(&school_layer_key(1)), Some(&layers[0]));
    assert_eq!(context.get_daily_layer(&school_layer_key(2)), None);
    assert_eq!(context.get_daily_layer(&school_layer_key(3)), Some(&layers[2]));
    assert!(context
        .get_static_layer(GENERIC_SCHOOL_LAYER)
        .unwrap()
        .is_empty());
}

#[test]
fn test_hybrid_cohorts_alternate() {
    let record: Rc<RefCell<Vec<IndexSet<PersonId>>>> = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&record);
    let params = run_params(
        14,
        HashMap::from([(
            SchoolType::Middle,
            Some(SchoolConfig {
                schedule: ScheduleKind::Hybrid,
                ..base_config()
            }),
        )]),
    );
    let mut context = setup_run(
        2,
        params,
        &[(SchoolType::Middle, 5, 30)],
        Box::new(move |context: &Context, _day: u32, manager: &SchoolsManager| {
            let school = &manager.get_schools()[0];
            let students: IndexSet<PersonId> = school
                .attendance()
                .scheduled
                .iter()
                .copied()
                .filter(|&p| {
                    context.get_person_property(p, SchoolRole) == Some(RoleGroup::Students)
                })
                .collect();
            log.borrow_mut().push(students);
        }),
    );
    context.execute();

    let days = record.borrow();
    assert_eq!(days.len(), 14);
    for week in [0, 7] {
        let a = &days[week];
        let b = &days[week + 3];
        assert!(!a.is_empty() && !b.is_empty());
        assert!(a.is_disjoint(b));
        assert_eq!(a, &days[week + 1]);
        assert_eq!(b, &days[week + 4]);
        for empty_day in [2, 5, 6] {
            assert!(days[week + empty_day].is_empty());
        }
    }
    // The cohorts do not change from week to week.
    assert_eq!(days[0], days[7]);
    assert_eq!(days[3], days[10]);
}

#[test]
fn test_hybrid_cohorts_are_reproducible() {
    let monday_students = |seed: u64| {
        let mut context = Context::new();
        context.init_random(seed);
        let layer = build_population(&mut context, &[(SchoolType::High, 9, 40)]);
        context.set_static_layer(GENERIC_SCHOOL_LAYER, layer);
        let scenario = SchoolScenario {
            start_date: monday(),
            n_days: 1,
            quarantine_period: 10,
            school_layer: LayerParams::default(),
            schools: HashMap::from([(
                SchoolType::High,
                Some(SchoolConfig {
                    schedule: ScheduleKind::Hybrid,
                    ..base_config()
                }),
            )]),
        };
        let mut manager = SchoolsManager::new(&mut context, &scenario).unwrap();
        manager.apply(&mut context, 0);
        manager.get_schools()[0].attendance().scheduled.clone()
    };
    assert_eq!(monday_students(17), monday_students(17));
}

#[test]
fn test_all_remote_school_holds_no_days() {
    let params = Params {
        initial_infections: 5,
        disease: DiseaseParams {
            beta: 1.0,
            ..DiseaseParams::default()
        },
        school_layer: LayerParams {
            beta: 1.0,
            ..LayerParams::default()
        },
        ..run_params(
            20,
            HashMap::from([(
                SchoolType::Elementary,
                Some(SchoolConfig {
                    schedule: ScheduleKind::Remote,
                    ..base_config()
                }),
            )]),
        )
    };
    let mut context = setup_run(
        3,
        params,
        &[(SchoolType::Elementary, 4, 20)],
        Box::new(|context: &Context, _day: u32, _manager: &SchoolsManager| {
            assert!(context
                .get_daily_layer(&school_layer_key(4))
                .unwrap()
                .is_empty());
        }),
    );
    context.execute();

    let report = context.get_school_report().unwrap();
    assert_eq!(report[&4].num_school_days, 0);
    // Without school contacts nobody beyond the seeds is ever exposed.
    let exposed = context
        .get_school_rosters()
        .iter()
        .flat_map(|roster| roster.members.iter())
        .filter(|&&p| context.date_exposed(p).is_some())
        .count();
    assert_eq!(exposed, 5);
    for series in report[&4].series.values() {
        // Seeds exposed on day 0 show up as newly exposed on day 1.
        assert!(series.newly_exposed.iter().skip(2).all(|&n| n == 0));
        assert!(series.in_person.iter().all(|&n| n == 0));
    }
}

#[test]
fn test_full_time_without_interventions() {
    let home_ever = Rc::new(RefCell::new(false));
    let observed = Rc::clone(&home_ever);
    let mut context = setup_run(
        4,
        run_params(10, HashMap::from([(SchoolType::Elementary, Some(base_config()))])),
        &[(SchoolType::Elementary, 1, 12)],
        Box::new(move |_context: &Context, _day: u32, manager: &SchoolsManager| {
            if !manager.get_schools()[0].uids_at_home().is_empty() {
                *observed.borrow_mut() = true;
            }
        }),
    );
    context.execute();

    assert!(!*home_ever.borrow());
    let report = context.get_school_report().unwrap();
    let stats = &report[&1];
    let roster_size: usize = stats.num.values().sum();
    assert_eq!(roster_size, 14);
    for day in 0..10 {
        let scheduled: usize = stats.series.values().map(|s| s.scheduled[day]).sum();
        let in_person: usize = stats.series.values().map(|s| s.in_person[day]).sum();
        // Days 5 and 6 are the weekend.
        let expected = if day % 7 < 5 { roster_size } else { 0 };
        assert_eq!(scheduled, expected);
        assert_eq!(in_person, expected);
    }
    assert_eq!(stats.num_school_days, 8);
}

#[test]
fn test_isolation_and_attendance_stay_consistent() {
    let config = SchoolConfig {
        screen_prob: 0.8,
        screen2pcr: 0.5,
        test_delay: 2,
        trace_prob: 0.7,
        quar_prob: 0.8,
        ili_prob: 0.01,
        ..base_config()
    };
    let params = Params {
        initial_infections: 10,
        disease: DiseaseParams {
            beta: 0.3,
            latent_period: 2.0,
            infectious_period: 6.0,
            symptomatic_probability: 0.7,
            ..DiseaseParams::default()
        },
        ..run_params(
            30,
            HashMap::from([
                (SchoolType::Elementary, Some(config.clone())),
                (SchoolType::High, Some(config)),
            ]),
        )
    };
    let mut context = setup_run(
        5,
        params,
        &[(SchoolType::Elementary, 1, 25), (SchoolType::High, 2, 25)],
        Box::new(|_context: &Context, day: u32, manager: &SchoolsManager| {
            for school in manager.get_schools() {
                let attendance = school.attendance();
                for (person_id, &release) in school.uids_at_home() {
                    assert!(release > day);
                    assert!(!attendance.in_person.contains(person_id));
                }
                assert!(attendance.in_person.is_subset(&attendance.arriving));
                assert!(attendance.arriving.is_subset(&attendance.scheduled));
            }
        }),
    );
    context.execute();

    let report = context.get_school_report().unwrap();
    for stats in report.values() {
        for series in stats.series.values() {
            for day in 0..30 {
                assert!(series.scheduled[day] >= series.in_person[day]);
                assert!(series.infectious_arrive[day] >= series.infectious_stay[day]);
            }
        }
    }
}

#[test]
fn test_perfect_screening_sends_home_every_active_case() {
    let config = SchoolConfig {
        screen_prob: 1.0,
        screen2pcr: 1.0,
        test_delay: 1,
        ili_prob: 0.0,
        ..base_config()
    };
    let params = Params {
        initial_infections: 15,
        disease: DiseaseParams {
            beta: 0.2,
            latent_period: 1.0,
            symptomatic_probability: 0.5,
            symptom_onset_delay: 0,
            ..DiseaseParams::default()
        },
        ..run_params(20, HashMap::from([(SchoolType::Middle, Some(config))]))
    };
    let screened_out = Rc::new(RefCell::new(0));
    let total = Rc::clone(&screened_out);
    let mut context = setup_run(
        6,
        params,
        &[(SchoolType::Middle, 3, 40)],
        Box::new(move |context: &Context, _day: u32, manager: &SchoolsManager| {
            let attendance = manager.get_schools()[0].attendance();
            let expected = attendance
                .arriving
                .iter()
                .filter(|&&p| {
                    (context.is_diagnosed(p) || context.is_symptomatic(p))
                        && !(context.is_recovered(p) || context.is_dead(p))
                })
                .count();
            let sent_home = attendance.arriving.len() - attendance.in_person.len();
            assert_eq!(sent_home, expected);
            *total.borrow_mut() += sent_home;
        }),
    );
    context.execute();
    assert!(*screened_out.borrow() > 0);
}
