// Use cases: concrete flows, fetch runs and reports

pub mod fetch;
pub mod flows;
pub mod report;
