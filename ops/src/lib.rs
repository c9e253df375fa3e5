pub mod aws;
pub mod commands;
pub mod config;
pub mod error;
pub mod info;
pub mod tracker;
