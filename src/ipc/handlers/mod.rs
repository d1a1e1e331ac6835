pub mod catalog;
pub mod core;
pub mod session;
pub mod setup;
pub mod timetable;
