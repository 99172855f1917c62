// Stage catalogue: filters, parsing, enrichment and sinks

pub mod enrich;
pub mod filters;
pub mod parse_date;
pub mod sinks;

pub use enrich::{LookupCache, LookupEnricher, Resolver};
pub use filters::{
    BoolEqualityFilter, DateRangeFilter, FieldInequalityFilter, FieldPresenceFilter, MatchMode, PrefixFilter,
    ValueExclusionFilter,
};
pub use parse_date::DateParser;
pub use sinks::{CountingSink, StoreSink};
