pub mod activities;
pub mod audit;
pub mod core;
pub mod courses;
pub mod grades;
pub mod users;
pub mod views;
