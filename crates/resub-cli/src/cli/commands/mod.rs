//! CLI command handlers, one file per area.

mod add;
mod apps;
mod rules;
mod store;
mod watch;

pub use add::{run_add_app, run_add_dev, run_add_package, run_add_replacement};
pub use apps::{run_apps, run_set_pattern, run_toggle};
pub use rules::run_rules;
pub use store::{run_get, run_put, run_remove, run_usage};
pub use watch::run_watch;
