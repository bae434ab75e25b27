pub mod serve;
pub mod setup;
pub mod tasks;
pub mod ui;
