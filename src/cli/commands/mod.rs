pub mod exec;
pub mod protocols;
