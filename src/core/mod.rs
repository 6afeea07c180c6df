pub mod commands;
pub mod config;
pub mod detection;
pub mod details;
pub mod reader;
pub mod result;
pub mod technology;
pub mod trace;
pub mod utils;
