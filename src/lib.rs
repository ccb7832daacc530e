pub mod broker;
pub mod clause;
pub mod client;
pub mod config;
pub mod error;
pub mod page;
pub mod registry;
pub mod row;
pub mod store;
pub mod types;
