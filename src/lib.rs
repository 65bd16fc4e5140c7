pub mod api;
pub mod errors;
pub mod ingestion_worker;
pub mod models;
pub mod planner;
pub mod storage;
pub mod universe;
