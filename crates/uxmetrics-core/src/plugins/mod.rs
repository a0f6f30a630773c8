//! Standard plugins.
//!
//! | key                 | plugin                     | handles              |
//! |---------------------|----------------------------|----------------------|
//! | `layoutShift`       | [`LayoutShiftPlugin`]      | start, stop, reset   |
//! | `navigation`        | [`NavigationTimingPlugin`] | start, reset         |
//! | `criticalResources` | [`CriticalResourcePlugin`] | stop, reset          |
//! | `reporter`          | [`ReporterPlugin`]         | stop                 |
//! | `log`               | [`LogPlugin`]              | all                  |

pub mod critical_resource;
pub mod layout_shift;
pub mod log;
pub mod navigation;
pub mod reporter;

pub use critical_resource::{
    CriticalResourcePlugin, ResourceCache, ResourceEntry, ResourceSummary, ResourceTimingSource,
    CRITICAL_RESOURCES_KEY,
};
pub use layout_shift::{LayoutShift, LayoutShiftPlugin, LayoutSource, PartialRect, Rect, LAYOUT_SHIFT_KEY};
pub use log::{LogPlugin, LOG_KEY};
pub use navigation::{NavigationTimingPlugin, NavigationTracker, NAVIGATION_KEY};
pub use reporter::{ReporterPlugin, REPORTER_KEY};
