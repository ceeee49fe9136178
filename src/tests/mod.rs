//! Integration tests: a reference interpreter, the end-to-end scenarios,
//! the property tests and the seeded fuzz runs.

mod fuzz;
mod properties;
mod scenarios;
