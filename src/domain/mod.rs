pub mod errors;
pub mod import_log;
pub mod mutation;
pub mod naming;
pub mod ports;
pub mod report;
pub mod rollback;
pub mod rules;
pub mod schema;
pub mod table;
pub mod value_objects;
pub mod workbook;
