//! Platform glue for runway: per-OS application directories, the platform
//! identifier used to pick runtime archives, and subprocess window hiding.

mod commands;
mod paths;
mod platform;

pub use commands::HideWindow;
pub use paths::{AppPaths, AppPathsError, HOME_ENV};
pub use platform::platform_id;
