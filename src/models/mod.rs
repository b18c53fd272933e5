//! Domain model module declarations.

pub mod result;
pub mod scenario;
pub mod session;
