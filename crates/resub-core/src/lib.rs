pub mod config;
pub mod logging;

pub mod background;
pub mod blob_store;
pub mod fetch;
pub mod inject;
pub mod kv;
pub mod live_reload;
pub mod model;
pub mod pattern;
pub mod rules;
