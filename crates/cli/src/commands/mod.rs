//! CLI Commands

pub mod check;
pub mod list;
pub mod report;
pub mod run;
