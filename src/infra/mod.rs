// Concrete resolvers behind the lookup enrichers

pub mod crm_db;
pub mod pipedrive;
pub mod snapshot;

pub use crm_db::{CrmAttribute, CrmDatabase, CrmExistence};
pub use pipedrive::{PipedriveClient, PipedriveOrganisationSearch};
pub use snapshot::{KeyDictionary, SnapshotExistence};
