use std::{
    collections::HashMap,
    fmt::{Display, Formatter},
    path::Path,
    str::FromStr,
};

use indexmap::IndexMap;
use ixa::{
    define_data_plugin, define_person_property, define_person_property_with_default, info,
    Context, ContextPeopleExt, IxaError, PersonId, PluginContext,
};
use serde::{Deserialize, Serialize};

use crate::{
    contact_layers::{ContactLayer, ContextContactLayersExt, GENERIC_SCHOOL_LAYER},
    parameters::{ContextParametersExt, Params},
};

/// The kinds of school a synthetic population assigns people to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SchoolType {
    #[serde(rename = "pk")]
    PreK,
    #[serde(rename = "es")]
    Elementary,
    #[serde(rename = "ms")]
    Middle,
    #[serde(rename = "hs")]
    High,
    #[serde(rename = "uv")]
    University,
}

impl SchoolType {
    /// Every school type, in the order schools are partitioned.
    pub const ALL: [SchoolType; 5] = [
        SchoolType::PreK,
        SchoolType::Elementary,
        SchoolType::Middle,
        SchoolType::High,
        SchoolType::University,
    ];
}

impl Display for SchoolType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SchoolType::PreK => write!(f, "pk"),
            SchoolType::Elementary => write!(f, "es"),
            SchoolType::Middle => write!(f, "ms"),
            SchoolType::High => write!(f, "hs"),
            SchoolType::University => write!(f, "uv"),
        }
    }
}

impl FromStr for SchoolType {
    type Err = IxaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pk" => Ok(SchoolType::PreK),
            "es" => Ok(SchoolType::Elementary),
            "ms" => Ok(SchoolType::Middle),
            "hs" => Ok(SchoolType::High),
            "uv" => Ok(SchoolType::University),
            _ => Err(IxaError::IxaError(format!("Unknown school type: {s}"))),
        }
    }
}

/// The role a person plays at their school.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleGroup {
    Students,
    Teachers,
    Staff,
}

impl RoleGroup {
    pub const ALL: [RoleGroup; 3] = [RoleGroup::Students, RoleGroup::Teachers, RoleGroup::Staff];
}

impl Display for RoleGroup {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RoleGroup::Students => write!(f, "students"),
            RoleGroup::Teachers => write!(f, "teachers"),
            RoleGroup::Staff => write!(f, "staff"),
        }
    }
}

impl FromStr for RoleGroup {
    type Err = IxaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" | "students" => Ok(RoleGroup::Students),
            "teacher" | "teachers" => Ok(RoleGroup::Teachers),
            "staff" => Ok(RoleGroup::Staff),
            _ => Err(IxaError::IxaError(format!("Unknown school role: {s}"))),
        }
    }
}

define_person_property!(Age, u8);
define_person_property_with_default!(SchoolRole, Option<RoleGroup>, None);

#[derive(Deserialize, Debug)]
struct PeopleRecord {
    id: u64,
    age: u8,
    role: String,
    school_type: String,
    school_id: Option<u32>,
}

#[derive(Deserialize, Debug)]
struct SchoolContactRecord {
    person1: u64,
    person2: u64,
    weight: Option<f64>,
}

#[derive(Default)]
struct SchoolRegistryContainer {
    schools: IndexMap<SchoolType, IndexMap<u32, Vec<PersonId>>>,
}

define_data_plugin!(
    SchoolRegistryPlugin,
    SchoolRegistryContainer,
    SchoolRegistryContainer::default()
);

/// One school's identity and enrolled people, as read from the population.
#[derive(Debug, Clone, PartialEq)]
pub struct SchoolRoster {
    pub school_type: SchoolType,
    pub school_id: u32,
    pub members: Vec<PersonId>,
}

pub trait ContextSchoolRegistryExt: PluginContext {
    /// Enroll a person in a school. School ids are unique across school types.
    fn add_school_member(
        &mut self,
        school_type: SchoolType,
        school_id: u32,
        person_id: PersonId,
    ) -> Result<(), IxaError> {
        let registry = self.get_data_mut(SchoolRegistryPlugin);
        if let Some(other_type) = registry
            .schools
            .iter()
            .find(|(t, schools)| **t != school_type && schools.contains_key(&school_id))
            .map(|(t, _)| *t)
        {
            return Err(IxaError::IxaError(format!(
                "School {school_id} is listed as both {other_type} and {school_type}."
            )));
        }
        registry
            .schools
            .entry(school_type)
            .or_default()
            .entry(school_id)
            .or_default()
            .push(person_id);
        Ok(())
    }

    /// Every school in the population, ordered by school type and then by id.
    fn get_school_rosters(&self) -> Vec<SchoolRoster> {
        let registry = self.get_data(SchoolRegistryPlugin);
        let mut rosters = Vec::new();
        for school_type in SchoolType::ALL {
            if let Some(schools) = registry.schools.get(&school_type) {
                let mut ids: Vec<u32> = schools.keys().copied().collect();
                ids.sort_unstable();
                for school_id in ids {
                    rosters.push(SchoolRoster {
                        school_type,
                        school_id,
                        members: schools[&school_id].clone(),
                    });
                }
            }
        }
        rosters
    }

    fn get_school_types(&self) -> Vec<SchoolType> {
        let registry = self.get_data(SchoolRegistryPlugin);
        SchoolType::ALL
            .into_iter()
            .filter(|t| registry.schools.contains_key(t))
            .collect()
    }
}

impl ContextSchoolRegistryExt for Context {}

fn parse_optional<T: FromStr<Err = IxaError>>(value: &str) -> Result<Option<T>, IxaError> {
    let value = value.trim();
    if value.is_empty() {
        Ok(None)
    } else {
        value.parse().map(Some)
    }
}

fn create_person_from_record(
    context: &mut Context,
    record: &PeopleRecord,
) -> Result<PersonId, IxaError> {
    let role: Option<RoleGroup> = parse_optional(&record.role)?;
    let school_type: Option<SchoolType> = parse_optional(&record.school_type)?;
    let person_id = context.add_person(((Age, record.age), (SchoolRole, role)))?;

    match (school_type, record.school_id) {
        (Some(school_type), Some(school_id)) => {
            context.add_school_member(school_type, school_id, person_id)?;
        }
        (None, None) => {}
        _ => {
            return Err(IxaError::IxaError(format!(
                "Person {} must have both a school type and a school id, or neither.",
                record.id
            )));
        }
    }
    Ok(person_id)
}

fn load_synth_population(
    context: &mut Context,
    synth_input_file: &Path,
) -> Result<HashMap<u64, PersonId>, IxaError> {
    let mut reader = csv::Reader::from_path(synth_input_file)?;
    let mut people = HashMap::new();
    for result in reader.deserialize() {
        let record: PeopleRecord = result?;
        let person_id = create_person_from_record(context, &record)?;
        if people.insert(record.id, person_id).is_some() {
            return Err(IxaError::IxaError(format!(
                "Person id {} appears more than once in the population file.",
                record.id
            )));
        }
    }
    Ok(people)
}

fn load_school_contacts(
    school_contacts_file: &Path,
    people: &HashMap<u64, PersonId>,
) -> Result<ContactLayer, IxaError> {
    let lookup = |id: u64| {
        people.get(&id).copied().ok_or_else(|| {
            IxaError::IxaError(format!(
                "School contact references person {id}, who is not in the population."
            ))
        })
    };

    let mut reader = csv::Reader::from_path(school_contacts_file)?;
    let mut layer = ContactLayer::new();
    for result in reader.deserialize() {
        let record: SchoolContactRecord = result?;
        layer.add_edge(
            lookup(record.person1)?,
            lookup(record.person2)?,
            record.weight.unwrap_or(1.0),
        );
    }
    Ok(layer)
}

pub fn init(context: &mut Context) -> Result<(), IxaError> {
    let Params {
        synth_population_file,
        school_contacts_file,
        school_layer,
        ..
    } = context.get_params().clone();

    let people = load_synth_population(context, &synth_population_file)?;
    let layer = load_school_contacts(&school_contacts_file, &people)?;
    info!(
        "Loaded {} people and {} school contacts",
        people.len(),
        layer.len()
    );
    context.register_layer_params(GENERIC_SCHOOL_LAYER, school_layer)?;
    context.set_static_layer(GENERIC_SCHOOL_LAYER, layer);
    Ok(())
}
