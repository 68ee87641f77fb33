//! Database access
//!
//! Connection setup and schema creation for the tables shared by the
//! playback services.

pub mod init;

pub use init::init_database;
