pub mod m3u_parser;
pub mod worker;

pub use worker::IngestionWorker;
