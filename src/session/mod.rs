pub mod pairing;
pub mod registry;
pub mod types;
