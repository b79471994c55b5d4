// src/models/mod.rs
pub mod condition;
pub mod subject;
pub mod verification;
