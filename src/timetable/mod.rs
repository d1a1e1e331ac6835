pub mod conflicts;
pub mod grid;
pub mod model;
pub mod store;
pub mod view;
pub mod workload;
