//! Pure imbalance computation over ranked holders and their resolved PNL.

pub mod imbalance;

pub use imbalance::ImbalanceAnalyzer;
