pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod hints;
pub mod pool;
pub mod runner;
pub mod validation;
