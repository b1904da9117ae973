//! Edit branding: origin annotations an editor maps back to views.

use crate::xml::Element;

use super::apply::{ORIGIN_ATTR, SOURCE_ATTR};
use super::view::VIEW_MODEL;

/// Attributes whose element renders raw output; nothing below is branded.
const RAW_OUTPUT_ATTRS: &[&str] = &["t-raw", "t-esc", "t-out"];

/// Annotates every element with `data-oe-model`, `data-oe-id`,
/// `data-oe-field` and `data-oe-xpath`.
///
/// `data-oe-xpath` locates the element within the arch of the view named by
/// `data-oe-id`, so it must run while origin and source markers are still
/// present. Descendants of raw output directives and `t-ignore` subtrees
/// are left untouched.
pub fn apply_branding(tree: &mut Element) {
    if tree.attr("t-ignore").is_some_and(|v| v != "0" && v != "false") {
        return;
    }
    if let (Some(origin), Some(source)) = (
        tree.attr(ORIGIN_ATTR).map(str::to_string),
        tree.attr(SOURCE_ATTR).map(str::to_string),
    ) {
        tree.set_attr("data-oe-model", VIEW_MODEL);
        tree.set_attr("data-oe-id", &origin);
        tree.set_attr("data-oe-field", "arch");
        tree.set_attr("data-oe-xpath", &source);
    }
    if RAW_OUTPUT_ATTRS.iter().any(|a| tree.has_attr(a)) {
        return;
    }
    for child in tree.children.iter_mut().filter_map(|n| n.as_element_mut()) {
        apply_branding(child);
    }
}
