//! Command-line front end for seedkit plus a set of demo seeders.

pub mod commands;
pub mod demo;
pub mod scaffold;
