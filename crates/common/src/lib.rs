// tally-common: shared types and wire protocol for the Tally workspace

pub mod protocol;
pub mod types;
