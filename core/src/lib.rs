//! Variable storage for an interpreted runtime.
//!
//! - [`table`]: chained hash table over a split primary/overflow slot array
//! - [`var`]: variable cells, dictionaries, stems and per-object scopes
//! - [`rt`]: re-entrant reservations serializing access to shared scopes
//! - [`gc`]: the mark-phase contract containers expose to the collector
//! - [`image`]: saving and reloading the pool

pub mod config;
pub mod gc;
pub mod image;
pub mod rt;
pub mod table;
pub mod util;
pub mod val;
pub mod var;
