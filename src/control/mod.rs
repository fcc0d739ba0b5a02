//! Decision layer: per-BSS learning agents and the optional central
//! controller, configured from a TOML file.

pub mod agent;
pub mod bandits;
pub mod config;
pub mod controller;
pub mod preprocessor;
