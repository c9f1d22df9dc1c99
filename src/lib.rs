pub mod bot;
pub mod config;
pub mod renamer;
pub mod telegram_log;
