pub mod context;
pub mod include;
pub mod registry;
