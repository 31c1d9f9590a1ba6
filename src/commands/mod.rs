pub mod config;
pub mod doctor;
pub mod up;

// Re-export all command functions
pub use config::cmd_config;
pub use doctor::cmd_doctor;
pub use up::cmd_up;
