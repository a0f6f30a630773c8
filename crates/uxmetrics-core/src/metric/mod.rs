mod base;
mod experience;
mod interaction;
mod snapshot;

pub use base::{Metric, MetricStatus, Outcome};
pub use experience::{ChildId, ExperienceMetric};
pub use interaction::InteractionMetric;
pub use snapshot::MetricSnapshot;
