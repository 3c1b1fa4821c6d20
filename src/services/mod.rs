pub mod scheduler;
pub mod setup;
pub mod startup;
pub mod worker;
