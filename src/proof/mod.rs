// src/proof/mod.rs
pub mod proof_encoder;
