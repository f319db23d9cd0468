pub mod admission;
pub mod backend;
pub mod breaker;
pub mod cascade;
pub mod catalog;
pub mod config;
pub mod error;
pub mod knowledge;
pub mod response;
pub mod server;
pub mod structured;
pub mod tools;
