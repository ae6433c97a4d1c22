use ixa::{
    define_data_plugin, define_report, report::ContextReportExt, trace, Context, IxaError,
    PluginContext,
};
use serde::{Deserialize, Serialize};

use crate::{
    population_loader::RoleGroup,
    schools::{ContextSchoolsExt, SchoolsReport},
};

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
struct SchoolDailyReport {
    day: usize,
    school_id: u32,
    school_type: String,
    group: String,
    infectious: usize,
    infectious_arrive: usize,
    infectious_stay: usize,
    newly_exposed: usize,
    scheduled: usize,
    in_person: usize,
}

define_report!(SchoolDailyReport);

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
struct SchoolSummaryReport {
    school_id: u32,
    school_type: String,
    schedule: String,
    students: usize,
    teachers: usize,
    staff: usize,
    num_school_days: usize,
    num_pcr_tests: usize,
    num_antigen_tests: usize,
}

define_report!(SchoolSummaryReport);

#[derive(Default)]
struct EnabledSchoolReports {
    daily: bool,
    summary: bool,
}

define_data_plugin!(
    SchoolReportsPlugin,
    EnabledSchoolReports,
    EnabledSchoolReports::default()
);

trait ContextSchoolReportsExt: PluginContext {
    fn enable_daily_report(&mut self) {
        self.get_data_mut(SchoolReportsPlugin).daily = true;
    }

    fn enable_summary_report(&mut self) {
        self.get_data_mut(SchoolReportsPlugin).summary = true;
    }

    fn daily_report_enabled(&self) -> bool {
        self.get_data(SchoolReportsPlugin).daily
    }

    fn summary_report_enabled(&self) -> bool {
        self.get_data(SchoolReportsPlugin).summary
    }
}

impl ContextSchoolReportsExt for Context {}

fn daily_rows(report: &SchoolsReport) -> Vec<SchoolDailyReport> {
    let mut rows = Vec::new();
    for stats in report.values() {
        for (group, series) in &stats.series {
            for day in 0..series.scheduled.len() {
                rows.push(SchoolDailyReport {
                    day,
                    school_id: stats.school_id,
                    school_type: stats.school_type.to_string(),
                    group: group.to_string(),
                    infectious: series.infectious[day],
                    infectious_arrive: series.infectious_arrive[day],
                    infectious_stay: series.infectious_stay[day],
                    newly_exposed: series.newly_exposed[day],
                    scheduled: series.scheduled[day],
                    in_person: series.in_person[day],
                });
            }
        }
    }
    rows
}

fn summary_rows(report: &SchoolsReport) -> Vec<SchoolSummaryReport> {
    report
        .values()
        .map(|stats| {
            let count = |group| stats.num.get(&group).copied().unwrap_or(0);
            SchoolSummaryReport {
                school_id: stats.school_id,
                school_type: stats.school_type.to_string(),
                schedule: format!("{:?}", stats.schedule),
                students: count(RoleGroup::Students),
                teachers: count(RoleGroup::Teachers),
                staff: count(RoleGroup::Staff),
                num_school_days: stats.num_school_days,
                num_pcr_tests: stats.num_pcr_tests,
                num_antigen_tests: stats.num_antigen_tests,
            }
        })
        .collect()
}

/// Write the collected school statistics to every enabled school report.
pub fn send_school_reports(context: &mut Context) {
    let Some(report) = context.get_school_report() else {
        return;
    };
    let daily = if context.daily_report_enabled() {
        daily_rows(report)
    } else {
        Vec::new()
    };
    let summary = if context.summary_report_enabled() {
        summary_rows(report)
    } else {
        Vec::new()
    };
    trace!(
        "Sending {} daily and {} summary school report rows",
        daily.len(),
        summary.len()
    );
    for row in daily {
        context.send_report(row);
    }
    for row in summary {
        context.send_report(row);
    }
}

/// # Errors
///
/// Will return `IxaError` if the report cannot be added
pub fn init_daily_report(context: &mut Context, file_name: &str) -> Result<(), IxaError> {
    context.add_report::<SchoolDailyReport>(file_name)?;
    context.enable_daily_report();
    Ok(())
}

/// # Errors
///
/// Will return `IxaError` if the report cannot be added
pub fn init_summary_report(context: &mut Context, file_name: &str) -> Result<(), IxaError> {
    context.add_report::<SchoolSummaryReport>(file_name)?;
    context.enable_summary_report();
    Ok(())
}
