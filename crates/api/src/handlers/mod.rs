pub mod admin;
pub mod tasks;
