pub mod config;
pub mod database;
pub mod errors;
pub mod ingestor;
pub mod ledger;
pub mod models;
pub mod proxy;
pub mod web;
