use indexmap::{IndexMap, IndexSet};
use ixa::{define_data_plugin, trace, Context, IxaError, PersonId, PluginContext};
use serde::{Deserialize, Serialize};

/// The key of the generic school layer built from the population's school contacts.
pub const GENERIC_SCHOOL_LAYER: &str = "school";

/// An undirected, weighted potential-transmission pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactEdge {
    pub p1: PersonId,
    pub p2: PersonId,
    pub weight: f64,
}

impl ContactEdge {
    #[must_use]
    pub fn new(p1: PersonId, p2: PersonId, weight: f64) -> Self {
        ContactEdge { p1, p2, weight }
    }

    #[must_use]
    pub fn touches(&self, people: &IndexSet<PersonId>) -> bool {
        people.contains(&self.p1) || people.contains(&self.p2)
    }
}

/// An unordered collection of undirected edges for one named context.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContactLayer {
    edges: Vec<ContactEdge>,
}

impl ContactLayer {
    #[must_use]
    pub fn new() -> Self {
        ContactLayer::default()
    }

    #[must_use]
    pub fn from_edges(edges: Vec<ContactEdge>) -> Self {
        ContactLayer { edges }
    }

    pub fn add_edge(&mut self, p1: PersonId, p2: PersonId, weight: f64) {
        self.edges.push(ContactEdge::new(p1, p2, weight));
    }

    #[must_use]
    pub fn edges(&self) -> &[ContactEdge] {
        &self.edges
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Everyone sharing an edge with at least one of `people`.
    #[must_use]
    pub fn find_contacts(&self, people: &IndexSet<PersonId>) -> IndexSet<PersonId> {
        let mut contacts = IndexSet::new();
        if people.is_empty() {
            return contacts;
        }
        for edge in &self.edges {
            if people.contains(&edge.p1) {
                contacts.insert(edge.p2);
            }
            if people.contains(&edge.p2) {
                contacts.insert(edge.p1);
            }
        }
        contacts
    }

    /// Drop every edge touching one of `people`.
    pub fn remove_people(&mut self, people: &IndexSet<PersonId>) {
        if people.is_empty() {
            return;
        }
        self.edges.retain(|edge| !edge.touches(people));
    }

    /// A copy of this layer without the edges touching `people`.
    #[must_use]
    pub fn without_people(&self, people: &IndexSet<PersonId>) -> ContactLayer {
        let mut layer = self.clone();
        layer.remove_people(people);
        layer
    }

    /// Move every edge touching one of `people` out of this layer and into the returned one.
    pub fn extract_touching(&mut self, people: &IndexSet<PersonId>) -> ContactLayer {
        let (touching, rest): (Vec<ContactEdge>, Vec<ContactEdge>) = std::mem::take(&mut self.edges)
            .into_iter()
            .partition(|edge| edge.touches(people));
        self.edges = rest;
        ContactLayer { edges: touching }
    }
}

/// Host-level parameters attached to a named layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LayerParams {
    /// Transmission-weight multiplier of the layer.
    pub beta: f64,
    /// Relative transmission from a diagnosed (isolating) person.
    pub iso_factor: f64,
    /// Relative transmission from a quarantined person. Carried with the layer
    /// for the host; transmission does not read it, since schools drop
    /// quarantined people from their daily layers instead.
    pub quar_factor: f64,
}

impl Default for LayerParams {
    fn default() -> Self {
        LayerParams {
            beta: 0.6,
            iso_factor: 0.1,
            quar_factor: 0.2,
        }
    }
}

impl LayerParams {
    pub fn validate(&self) -> Result<(), IxaError> {
        if self.beta < 0.0 {
            return Err(IxaError::IxaError(
                "The layer transmission multiplier must be non-negative.".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.iso_factor) || !(0.0..=1.0).contains(&self.quar_factor) {
            return Err(IxaError::IxaError(
                "Layer isolation and quarantine factors must be between 0 and 1, inclusive."
                    .to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Default)]
struct ContactLayersContainer {
    params: IndexMap<String, LayerParams>,
    static_layers: IndexMap<String, ContactLayer>,
    daily_layers: IndexMap<String, ContactLayer>,
}

define_data_plugin!(
    ContactLayersPlugin,
    ContactLayersContainer,
    ContactLayersContainer::default()
);

pub trait ContextContactLayersExt: PluginContext {
    /// Register the parameters of a named layer. Each layer is registered once.
    fn register_layer_params(&mut self, key: &str, params: LayerParams) -> Result<(), IxaError> {
        params.validate()?;
        let container = self.get_data_mut(ContactLayersPlugin);
        if container.params.contains_key(key) {
            return Err(IxaError::IxaError(format!(
                "Layer {key} has already been registered."
            )));
        }
        trace!("Registering layer {key} with {params:?}");
        container.params.insert(key.to_string(), params);
        Ok(())
    }

    fn get_layer_params(&self, key: &str) -> Option<LayerParams> {
        self.get_data(ContactLayersPlugin).params.get(key).copied()
    }

    /// Set a layer that stays active every day until replaced.
    fn set_static_layer(&mut self, key: &str, layer: ContactLayer) {
        self.get_data_mut(ContactLayersPlugin)
            .static_layers
            .insert(key.to_string(), layer);
    }

    /// Remove a static layer from the registry, leaving an empty layer in its place.
    fn take_static_layer(&mut self, key: &str) -> ContactLayer {
        self.get_data_mut(ContactLayersPlugin)
            .static_layers
            .get_mut(key)
            .map(std::mem::take)
            .unwrap_or_default()
    }

    fn get_static_layer(&self, key: &str) -> Option<&ContactLayer> {
        self.get_data(ContactLayersPlugin).static_layers.get(key)
    }

    /// Install today's version of a layer, replacing whatever was installed for it before.
    fn install_daily_layer(&mut self, key: &str, layer: ContactLayer) {
        let container = self.get_data_mut(ContactLayersPlugin);
        if let Some(existing) = container.daily_layers.get_mut(key) {
            *existing = layer;
        } else {
            container.daily_layers.insert(key.to_string(), layer);
        }
    }

    fn get_daily_layer(&self, key: &str) -> Option<&ContactLayer> {
        self.get_data(ContactLayersPlugin).daily_layers.get(key)
    }

    /// Every layer transmission runs over today: static layers, then daily layers,
    /// each in the order they were first added. Layers without registered
    /// parameters use the defaults.
    fn get_active_layers(&self) -> Vec<(&str, LayerParams, &ContactLayer)> {
        let container = self.get_data(ContactLayersPlugin);
        container
            .static_layers
            .iter()
            .chain(container.daily_layers.iter())
            .map(|(key, layer)| {
                let params = container.params.get(key).copied().unwrap_or_default();
                (key.as_str(), params, layer)
            })
            .collect()
    }
}

impl ContextContactLayersExt for Context {}
