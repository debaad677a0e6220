pub mod app_error;
pub mod app_state;
pub mod auth;
pub mod bootstrap;
pub mod catalog;
pub mod config;
pub mod db;
pub mod jobs;
pub mod models;
pub mod notifications;
pub mod routes;
pub mod schema;
pub mod services;
pub mod swagger;
