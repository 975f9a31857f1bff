pub(crate) mod log;
pub(crate) mod report;

use self::report::{Json, Plain, ReportFormatter};
use crate::options::OutputFormat;

/// Create a report formatter based on the given format option
pub(crate) fn get_report_formatter(format: &OutputFormat) -> Box<dyn ReportFormatter> {
    match format {
        OutputFormat::Plain => Box::new(Plain),
        OutputFormat::Json => Box::new(Json),
    }
}
