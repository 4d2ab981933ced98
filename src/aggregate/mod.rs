pub mod bucket;
pub mod collector;
pub mod merge;
pub mod report;

pub use report::ReportService;
