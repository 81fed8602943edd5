pub mod catalog;
pub mod core;
pub mod import;
pub mod measurements;
pub mod reports;
pub mod setup;
pub mod students;
