pub mod em;
pub mod expected_count;
pub mod inside_outside;

pub use em::{EmTrainer, IterationReport, TrainingConfig, TrainingReport};
pub use expected_count::ExpectedCounts;
pub use inside_outside::InsideOutside;
