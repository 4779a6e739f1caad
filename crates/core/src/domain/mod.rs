pub mod actor;
pub mod client;
pub mod knowledge;
pub mod mutation;
pub mod pending;
pub mod plan;
pub mod session;
