mod engine;
mod solver;
mod strategy;
mod tax;
mod types;

pub use engine::project;
pub use tax::{BracketRow, CAPITAL_GAINS_INCLUSION_RATE, tax_brackets_reference, tax_owed};
pub use types::{Inputs, Projection, ProjectionError, Strategy, YearRecord};
