//! The four registry flows. Each one wires the same stage catalogue in its
//! own order with its own field names.

use crate::constants::*;
use crate::pipeline::counters::RunCounters;
use crate::pipeline::processing::{
    BoolEqualityFilter, CountingSink, DateParser, DateRangeFilter, FieldInequalityFilter, FieldPresenceFilter,
    LookupEnricher, PrefixFilter, Resolver, StoreSink, ValueExclusionFilter,
};
use crate::pipeline::storage::MergeStore;
use crate::pipeline::Chain;
use chrono::{Datelike, NaiveDate};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub type SharedResolver = Arc<dyn Resolver>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    /// Radio frequency resolutions expiring in the range.
    Resolutions,
    /// Licences expiring in the range.
    Prolongation,
    /// Licences whose service start falls in the range.
    Commissioning,
    /// Existing clients holding licences for special services.
    Special,
}

impl FlowKind {
    pub fn name(&self) -> &'static str {
        match self {
            FlowKind::Resolutions => RESOLUTIONS_FLOW,
            FlowKind::Prolongation => PROLONGATION_FLOW,
            FlowKind::Commissioning => COMMISSIONING_FLOW,
            FlowKind::Special => SPECIAL_FLOW,
        }
    }

    /// Date field reports sort by.
    pub fn date_field(&self) -> &'static str {
        match self {
            FlowKind::Resolutions => VALID_TO,
            FlowKind::Prolongation | FlowKind::Special => DATE_END,
            FlowKind::Commissioning => DATE_SERVICE_START,
        }
    }

    pub fn needs_range(&self) -> bool {
        !matches!(self, FlowKind::Special)
    }

    pub fn uses_ours_flag(&self) -> bool {
        matches!(self, FlowKind::Prolongation | FlowKind::Commissioning)
    }
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FlowKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            RESOLUTIONS_FLOW | "resolutions" => Ok(FlowKind::Resolutions),
            PROLONGATION_FLOW | "prolongation" => Ok(FlowKind::Prolongation),
            COMMISSIONING_FLOW | "commissioning" => Ok(FlowKind::Commissioning),
            SPECIAL_FLOW | "special" => Ok(FlowKind::Special),
            other => Err(format!("unknown flow '{}'", other)),
        }
    }
}

/// Inclusive day range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, String> {
        if start > end {
            return Err(format!("range start {} is after end {}", start, end));
        }
        Ok(Self { start, end })
    }

    /// Longest text prefix shared by every year in the range: "2021" for a
    /// single year, "202" for 2021..2022.
    pub fn year_prefix(&self) -> String {
        let start = self.start.year().to_string();
        let end = self.end.year().to_string();
        start
            .chars()
            .zip(end.chars())
            .take_while(|(a, b)| a == b)
            .map(|(a, _)| a)
            .collect()
    }
}

/// Run parameters that select a flow's store namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowParams {
    pub range: Option<DateRange>,
    pub ours: bool,
}

/// `<flow>[_<start>-<end>][_<ours>]`; each distinct parameter set gets its
/// own store.
pub fn namespace(kind: FlowKind, params: &FlowParams) -> String {
    let mut ns = kind.name().to_string();
    if let Some(range) = params.range {
        ns.push_str(&format!("_{}-{}", range.start, range.end));
    }
    if kind.uses_ours_flag() {
        ns.push_str(&format!("_{}", params.ours));
    }
    ns
}

/// A wired chain plus the handles its caller reads during and after the run.
pub struct BuiltFlow {
    pub chain: Chain,
    pub counters: Arc<RunCounters>,
}

fn finish(chain: Chain, store: Arc<MergeStore>) -> BuiltFlow {
    let counting = CountingSink::new().with_flag(OUR);
    let counters = counting.counters();
    BuiltFlow {
        chain: chain.then(StoreSink::new(store)).then(counting),
        counters,
    }
}

pub fn resolutions_chain(
    range: DateRange,
    name_to_inn: SharedResolver,
    crm_existence: SharedResolver,
    org_search: SharedResolver,
    store: Arc<MergeStore>,
) -> BuiltFlow {
    // Dirty dates such as 3018-03-03 are cut by year before parsing.
    let chain = Chain::new()
        .then(PrefixFilter::new(VALID_TO, range.year_prefix()))
        .then(DateParser::new(VALID_TO))
        .then(DateRangeFilter::new(VALID_TO, range.start, range.end))
        .then(LookupEnricher::new(OWNER_NAME, INN, name_to_inn))
        .then(FieldPresenceFilter::new(INN))
        .then(LookupEnricher::existence(INN, OUR, crm_existence))
        .then(BoolEqualityFilter::new(OUR, true))
        .then(LookupEnricher::new(INN, PIPEDRIVE_ORG_ID, org_search));
    finish(chain, store)
}

pub fn prolongation_chain(
    range: DateRange,
    ours: bool,
    snapshot_existence: SharedResolver,
    org_search: SharedResolver,
    store: Arc<MergeStore>,
) -> BuiltFlow {
    let chain = Chain::new()
        .then(PrefixFilter::new(DATE_END, "202"))
        .then(DateParser::new(DATE_END))
        .then(ValueExclusionFilter::exact(LICENCE_STATUS, [INACTIVE_STATUS]))
        .then(DateRangeFilter::new(DATE_END, range.start, range.end))
        .then(ValueExclusionFilter::exact(SERVICE_NAME, PROLONGATION_EXCLUDED_SERVICES.iter().copied()))
        .then(ValueExclusionFilter::substring(NAME, [INDIVIDUAL_ENTREPRENEUR]))
        .then(LookupEnricher::existence(INN, OUR, snapshot_existence))
        .then(BoolEqualityFilter::new(OUR, ours))
        .then(LookupEnricher::new(INN, PIPEDRIVE_ORG_ID, org_search));
    finish(chain, store)
}

pub fn commissioning_chain(
    range: DateRange,
    ours: bool,
    crm_existence: SharedResolver,
    org_search: SharedResolver,
    store: Arc<MergeStore>,
) -> BuiltFlow {
    let chain = Chain::new()
        .then(PrefixFilter::new(DATE_SERVICE_START, "20"))
        .then(DateParser::new(DATE_SERVICE_START))
        .then(DateParser::new(DATE_START))
        .then(ValueExclusionFilter::exact(SERVICE_NAME, COMMISSIONING_EXCLUDED_SERVICES.iter().copied()))
        .then(ValueExclusionFilter::substring(NAME, [INDIVIDUAL_ENTREPRENEUR]))
        .then(DateRangeFilter::new(DATE_SERVICE_START, range.start, range.end))
        .then(FieldInequalityFilter::new([DATE_SERVICE_START, DATE_START]))
        .then(LookupEnricher::existence(INN, OUR, crm_existence))
        .then(BoolEqualityFilter::new(OUR, ours))
        .then(LookupEnricher::new(INN, PIPEDRIVE_ORG_ID, org_search));
    finish(chain, store)
}

pub fn special_chain(crm_existence: SharedResolver, crm_phone: SharedResolver, store: Arc<MergeStore>) -> BuiltFlow {
    let chain = Chain::new()
        .then(PrefixFilter::new(DATE_END, "20"))
        .then(DateParser::new(DATE_END))
        .then(ValueExclusionFilter::exact(SERVICE_NAME, SPECIAL_EXCLUDED_SERVICES.iter().copied()))
        .then(FieldPresenceFilter::new(INN))
        .then(LookupEnricher::existence(INN, OUR, crm_existence))
        .then(BoolEqualityFilter::new(OUR, true))
        .then(LookupEnricher::new(INN, TEL, crm_phone));
    finish(chain, store)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_namespace_is_qualified_by_parameters() {
        let range = Some(DateRange::new(d("2021-01-01"), d("2021-12-31")).unwrap());
        assert_eq!(
            namespace(FlowKind::Prolongation, &FlowParams { range, ours: true }),
            "prolongation_licenses_2021-01-01-2021-12-31_true"
        );
        assert_eq!(
            namespace(FlowKind::Resolutions, &FlowParams { range, ours: true }),
            "prolongation_resolutions_2021-01-01-2021-12-31"
        );
        assert_eq!(
            namespace(FlowKind::Special, &FlowParams { range: None, ours: true }),
            "special_licenses"
        );
    }

    #[test]
    fn test_flow_kind_parsing() {
        assert_eq!("commissioning".parse::<FlowKind>().unwrap(), FlowKind::Commissioning);
        assert_eq!(SPECIAL_FLOW.parse::<FlowKind>().unwrap(), FlowKind::Special);
        assert!("nope".parse::<FlowKind>().is_err());
    }

    #[test]
    fn test_year_prefix_covers_every_year_in_range() {
        let one_year = DateRange::new(d("2021-01-01"), d("2021-12-31")).unwrap();
        assert_eq!(one_year.year_prefix(), "2021");
        let new_year = DateRange::new(d("2021-12-01"), d("2022-01-31")).unwrap();
        assert_eq!(new_year.year_prefix(), "202");
        let decade = DateRange::new(d("2019-06-01"), d("2020-06-01")).unwrap();
        assert_eq!(decade.year_prefix(), "20");
    }

    #[test]
    fn test_inverted_range_is_rejected() {
        assert!(DateRange::new(d("2021-12-31"), d("2021-01-01")).is_err());
    }
}
