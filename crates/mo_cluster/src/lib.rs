pub mod api;
pub mod bucket;
pub mod config;
pub mod controllers;
pub mod failover;
pub mod overlay;
pub mod store;
pub mod util;

#[cfg(test)]
pub mod tests;
