//! Database record structures.

pub mod credits;
pub mod tokens;
pub mod users;
