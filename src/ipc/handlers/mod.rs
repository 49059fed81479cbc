pub mod activities;
pub mod classes;
pub mod core;
pub mod reports;
pub mod settings;
pub mod students;
pub mod submissions;
