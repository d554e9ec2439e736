mod fingerprint;
mod geometry;
mod history;

pub use fingerprint::{SemanticFingerprint, UnstableElement};
pub use geometry::{LocatedElement, Point, Rect};
pub use history::{
    ConfidenceFactors, HealingHistoryEntry, HealingResult, HealingStrategy,
};
