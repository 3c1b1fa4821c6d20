pub mod git;
pub mod startup;
