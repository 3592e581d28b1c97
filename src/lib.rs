// Library for tests to access modules

pub mod accessor;
pub mod aggregation;
pub mod config;
pub mod error;
pub mod models;
pub mod reaggregator;
pub mod routes;
pub mod staging;
pub mod store;
