//! Machine-timeline scheduling engine.
//!
//! Pure computation over a snapshot of scheduled intervals: slot search,
//! conflict detection, cascading push-back and placement validation. Nothing
//! here writes jobs; callers apply the returned [`crate::CommitPayload`].

mod cascade;
mod conflict;
mod drag;
mod placement;
mod slot_finder;
mod timeline;

pub use cascade::CascadeResolver;
pub use conflict::{detect_conflicts, overlaps, ConflictEntry, ConflictSet};
pub use drag::{DragMode, DragRelease, DragSession};
pub use placement::{
    plan_placement, recompute, FieldError, PlacementCandidate, PlacementError, PlacementState,
    PlacementValidator, ValidCandidate,
};
pub use slot_finder::{AvailableSlot, SlotFinder, SlotSuggestion};
pub use timeline::TimelineIndex;
