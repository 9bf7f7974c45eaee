//! Database record structures for requests into and responses out of the repositories.

pub mod analyses;
pub mod credits;
pub mod users;
