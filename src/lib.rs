pub mod app;
pub mod config;
pub mod debounce;
pub mod favorites;
pub mod filters;
pub mod loader;
pub mod models;
pub mod tmdb;
