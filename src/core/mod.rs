pub mod agent;
pub mod brain;
pub mod config;
pub mod fleet;
pub mod lifecycle;
pub mod llm;
pub mod memory;
pub mod scheduler;
pub mod terminal;
pub mod tools;
