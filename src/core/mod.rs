pub mod config;
pub mod error;
pub mod io;
pub mod outline;
pub mod store;
