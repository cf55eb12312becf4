pub mod codec;
pub mod connection;
pub mod constants;
pub mod transport;
pub mod types;
