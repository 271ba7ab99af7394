pub mod changelog;
pub mod clients;
pub mod config;
pub mod monitor;
pub mod repository;
