//! View composition engine.
//!
//! A primary view's arch is combined with the patch specs of every active
//! inheriting view, then gated by the user's groups, validated against the
//! registry and optionally branded. Assembled results are cached per user
//! group set and invalidated through table versions.

mod apply;
mod branding;
mod cache;
mod engine;
mod gating;
mod patch;
mod validate;
mod view;

pub use apply::{apply_patches, ORIGIN_ATTR, SOURCE_ATTR};
pub use cache::{CacheKey, CacheStamp, ViewCache};
pub use engine::{AssembledView, ViewEngine};
pub use patch::{parse_patches, AttributeEdit, Locator, Patch, Position};
pub use validate::validate_arch;
pub use view::{load_views, View, ViewMode, VIEW_MODEL};
