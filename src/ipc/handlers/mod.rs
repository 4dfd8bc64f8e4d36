pub mod attendance;
pub mod core;
pub mod imports;
pub mod legacy_students;
pub mod session;
pub mod setup;
pub mod students;
