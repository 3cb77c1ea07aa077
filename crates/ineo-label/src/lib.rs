//! Labelling layer: membership classification, external assessment, batch labelling.

pub mod assess;
pub mod classifier;
pub mod labeller;

pub use assess::{Assessment, CommandEvaluator, EvaluateError, Evaluator, facet_bindings};
pub use classifier::{ClassifyError, MatchReason, Verdict, classify};
pub use labeller::{LabelError, LabelStats, Labeller};
