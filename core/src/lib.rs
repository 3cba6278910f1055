pub mod auth;
pub mod calorie_csv;
pub mod db;
pub mod metrics;
pub mod models;
pub mod service;
pub mod store;
pub mod sync;
