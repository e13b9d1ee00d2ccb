pub mod admin;
pub mod auth;
pub mod business;
pub mod config;
pub mod console;
pub mod engine;
pub mod limits;
pub mod meeting;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reaper;
pub mod reference;
pub mod scheduler;
pub mod slot_lock;
pub mod store;
pub mod window;
