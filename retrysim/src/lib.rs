pub mod cli;
pub mod config;
pub mod driver;
pub mod error;
pub mod event;
pub mod model;
pub mod output;
pub mod policy;
pub mod scenario;
pub mod session;
pub mod stats;
