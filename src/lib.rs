pub mod admission;
pub mod config;
pub mod control;
pub mod dispatch;
pub mod error;
pub mod generate;
pub mod persist;
pub mod request;
pub mod response;
pub mod server;
pub mod tools;
