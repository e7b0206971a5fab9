// Consensus rules: proof of work, block validation, fork choice

pub mod pow;
pub mod validation;

pub use pow::{DIFFICULTY, MiningResult, ProofOfWork};
pub use validation::{BlockValidator, TipChoice, ValidationError, choose_tip};
