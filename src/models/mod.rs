//! Domain model module declarations.

pub mod availability;
pub mod output;
pub mod session;
pub mod spawn;
