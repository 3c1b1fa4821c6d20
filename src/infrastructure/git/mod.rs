pub mod client;
pub mod scripts;

pub use client::GitCliClient;
