pub mod batch;
pub mod coerce;
pub mod import;
pub mod matcher;
pub mod monitoring;
pub mod reconcile;
pub mod rollback;
pub mod rules;
pub mod schema;
pub mod session;
pub mod validation;
