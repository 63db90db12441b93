pub mod scoring;

pub use scoring::{momentum, rank, volatility, ScoreRecord};
