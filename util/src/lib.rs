pub mod config;
pub mod logging;
pub mod test_helpers;
pub mod ws;
