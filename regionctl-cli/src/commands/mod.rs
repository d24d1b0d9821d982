//! CLI Commands

pub mod balance;
pub mod config;
pub mod tables;

pub use balance::run as balance;
pub use tables::run as tables;
