//! Element locator collaborator.
//!
//! The visual/AI capability that turns a semantic description into screen
//! geometry (and back) lives outside this crate. Hosts implement
//! [`ElementLocator`] and inject it into the engine.

use async_trait::async_trait;

use crate::db::models::{LocatedElement, Point};
use crate::error::AppError;

/// Per-call options for [`ElementLocator::locate`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocateOptions {
    /// Use the expanded, more exploratory search mode.
    pub deep_think: bool,
}

#[async_trait]
pub trait ElementLocator: Send + Sync {
    /// Find the element matching `description`.
    ///
    /// `Ok(None)` means the search ran and found nothing; `Err` is a transport
    /// or internal failure. The engine treats both as a failed attempt.
    async fn locate(
        &self,
        description: &str,
        options: LocateOptions,
    ) -> Result<Option<LocatedElement>, AppError>;

    /// Produce a semantic description of the element at `center`. Best-effort.
    async fn describe(&self, center: Point) -> Result<String, AppError>;
}

/// Description captured for a fingerprint, tagged with where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescribedElement {
    /// The locator produced a real description.
    Generated(String),
    /// Description generation failed; a positional placeholder was used.
    Fallback(String),
}

impl DescribedElement {
    /// Positional placeholder used when the locator cannot describe the element.
    pub fn fallback_for(center: Point) -> Self {
        DescribedElement::Fallback(format!(
            "element at position ({}, {})",
            center.x.round(),
            center.y.round()
        ))
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, DescribedElement::Fallback(_))
    }

    pub fn into_text(self) -> String {
        match self {
            DescribedElement::Generated(s) | DescribedElement::Fallback(s) => s,
        }
    }
}
