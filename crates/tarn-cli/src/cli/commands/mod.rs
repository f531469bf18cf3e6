pub mod checkpoints;
pub mod config;
pub mod exec;
pub mod folds;
