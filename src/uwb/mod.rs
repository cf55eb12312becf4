pub mod ranging;
pub mod simulated;
pub mod types;
