pub mod configuration;
pub mod db;
pub mod deploy;
mod helpers;
pub mod ledger;
pub mod middleware;
pub mod models;
pub mod remote;
pub mod routes;
pub mod services;
pub mod startup;
pub mod telemetry;
