//! Data shapes exchanged between the HTTP layer and the file service.
//!
//! These types carry no storage logic; they serialize as the JSON the
//! clients of the gateway expect via `serde`.

pub mod file;
