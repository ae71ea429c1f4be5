//! Test support for the migration engine.

pub mod test_api;
