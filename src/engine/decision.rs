//! Accept / confirm / reject policy over a healing result.

use serde::{Deserialize, Serialize};

use crate::db::models::HealingResult;

/// What the caller should do with a healing result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealingAction {
    /// Apply the healed location without asking.
    AutoAccept,
    /// Located something, but a human should confirm it.
    RequestConfirmation,
    /// Nothing usable was found.
    Reject,
}

/// Total over every `(success, confidence, threshold)`; `Reject` iff `!success`.
pub fn determine_action(result: &HealingResult, auto_accept_threshold: u8) -> HealingAction {
    if !result.success {
        return HealingAction::Reject;
    }
    if result.confidence >= auto_accept_threshold {
        HealingAction::AutoAccept
    } else {
        HealingAction::RequestConfirmation
    }
}
