use ixa::{Context, IxaError};
use serde::{Deserialize, Serialize};

use crate::parameters::{ContextParametersExt, Params};

pub mod school_report;

pub use school_report::send_school_reports;

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub enum ReportType {
    /// One row per school, role group and day.
    SchoolDailyReport { name: String },
    /// One row per school.
    SchoolSummaryReport { name: String },
}

/// # Errors
///
/// Will return `IxaError` if a report cannot be added
pub fn init(context: &mut Context) -> Result<(), IxaError> {
    let Params { reports, .. } = context.get_params().clone();

    for report in &reports {
        match report {
            ReportType::SchoolDailyReport { name } => {
                school_report::init_daily_report(context, name.as_str())?;
            }
            ReportType::SchoolSummaryReport { name } => {
                school_report::init_summary_report(context, name.as_str())?;
            }
        }
    }
    Ok(())
}
