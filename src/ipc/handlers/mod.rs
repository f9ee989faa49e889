pub mod activities;
pub mod core;
pub mod records;
pub mod roster;
pub mod stats;
