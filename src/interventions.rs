use ixa::{define_data_plugin, trace, Context, PluginContext};

/// An intervention the host model invokes once per simulated day, after
/// disease progression and before transmission.
pub trait DailyIntervention {
    fn apply(&mut self, context: &mut Context, day: u32);

    /// Called once, on the final simulated day, after that day's transmission.
    fn finalize(&mut self, _context: &mut Context) {}

    /// For logging. The name of the intervention.
    fn get_name(&self) -> String;
}

#[derive(Default)]
struct InterventionContainer {
    interventions: Vec<Box<dyn DailyIntervention>>,
}

define_data_plugin!(
    InterventionPlugin,
    InterventionContainer,
    InterventionContainer::default()
);

pub trait ContextInterventionExt: PluginContext {
    /// Register an intervention. Interventions run in registration order.
    fn register_daily_intervention<T: DailyIntervention + 'static>(&mut self, intervention: T) {
        trace!("Registering daily intervention {}", intervention.get_name());
        self.get_data_mut(InterventionPlugin)
            .interventions
            .push(Box::new(intervention));
    }

    fn number_of_interventions(&self) -> usize {
        self.get_data(InterventionPlugin).interventions.len()
    }

    #[doc(hidden)]
    fn take_interventions(&mut self) -> Vec<Box<dyn DailyIntervention>> {
        std::mem::take(&mut self.get_data_mut(InterventionPlugin).interventions)
    }

    /// Put interventions back in front of any registered since they were taken.
    #[doc(hidden)]
    fn restore_interventions(&mut self, mut interventions: Vec<Box<dyn DailyIntervention>>) {
        let container = self.get_data_mut(InterventionPlugin);
        interventions.append(&mut container.interventions);
        container.interventions = interventions;
    }
}

impl ContextInterventionExt for Context {}

// Interventions need `&mut Context` while they run, so they are moved out of
// the plugin for the duration of the call.
fn with_interventions(
    context: &mut Context,
    mut f: impl FnMut(&mut dyn DailyIntervention, &mut Context),
) {
    let mut interventions = context.take_interventions();
    for intervention in &mut interventions {
        f(intervention.as_mut(), context);
    }
    context.restore_interventions(interventions);
}

pub fn apply_daily_interventions(context: &mut Context, day: u32) {
    with_interventions(context, |intervention, context| {
        intervention.apply(context, day);
    });
}

pub fn finalize_daily_interventions(context: &mut Context) {
    with_interventions(context, |intervention, context| {
        trace!("Finalizing {}", intervention.get_name());
        intervention.finalize(context);
    });
}
