pub mod aggregator;

pub use aggregator::{confidence_label, ContentContext, ContextAggregator, ViralHook};
