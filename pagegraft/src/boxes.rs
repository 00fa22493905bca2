//! Page box resolution, including page-tree inheritance.

use crate::trace::warn;
use hayro_syntax::object::dict::keys::{ART_BOX, BLEED_BOX, CROP_BOX, MEDIA_BOX, PARENT, TRIM_BOX};
use hayro_syntax::object::{Array, Dict, MaybeRef, Object};
use kurbo::Rect;

/// The page box that should become the bounding box of an embedded page.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PageBoxKind {
    /// The media box.
    Media,
    /// The crop box. Falls back to the media box.
    Crop,
    /// The bleed box. Falls back to the crop box.
    Bleed,
    /// The trim box. Falls back to the crop box.
    Trim,
    /// The art box. Falls back to the crop box.
    Art,
}

const DEFAULT_MEDIA_BOX: Rect = Rect::new(0.0, 0.0, 595.0, 842.0);

/// Resolve the requested box of a page dictionary.
pub(crate) fn determine_page_box(page: &Dict<'_>, kind: PageBoxKind) -> Rect {
    match kind {
        PageBoxKind::Media => {
            match query_inherited(page, MEDIA_BOX).and_then(|a| rect_from_array(&a)) {
                Some(rect) => rect,
                None => {
                    warn!("page does not have a usable media box, defaulting to A4");
                    DEFAULT_MEDIA_BOX
                }
            }
        }
        PageBoxKind::Crop => match query_inherited(page, CROP_BOX).and_then(|a| rect_from_array(&a))
        {
            Some(rect) => rect,
            None => determine_page_box(page, PageBoxKind::Media),
        },
        // The remaining boxes are attributes of the page itself and don't inherit.
        PageBoxKind::Bleed => page_level_box(page, BLEED_BOX),
        PageBoxKind::Trim => page_level_box(page, TRIM_BOX),
        PageBoxKind::Art => page_level_box(page, ART_BOX),
    }
}

fn page_level_box(page: &Dict<'_>, key: &[u8]) -> Rect {
    match page.get::<Array<'_>>(key).and_then(|a| rect_from_array(&a)) {
        Some(rect) => rect,
        None => determine_page_box(page, PageBoxKind::Crop),
    }
}

/// Look up an attribute on the page, or on the closest ancestor that carries it.
///
/// A page that has the key with an unusable value does not consult its parent.
fn query_inherited<'a>(dict: &Dict<'a>, key: &[u8]) -> Option<Array<'a>> {
    if dict.contains_key(key) {
        return dict.get::<Array<'_>>(key);
    }

    if dict.contains_key(PARENT) {
        return query_inherited(&dict.get::<Dict<'_>>(PARENT)?, key);
    }

    None
}

fn rect_from_array(array: &Array<'_>) -> Option<Rect> {
    if array.raw_iter().count() != 4 {
        warn!("page box array does not have exactly four entries");
        return None;
    }

    let mut coords = [0.0_f64; 4];
    for (slot, item) in coords.iter_mut().zip(array.raw_iter()) {
        *slot = number_or_zero(&item);
    }

    Some(Rect::new(coords[0], coords[1], coords[2], coords[3]))
}

// Box entries are read in place, so a reference in a box array coerces to zero.
fn number_or_zero(value: &MaybeRef<Object<'_>>) -> f64 {
    match value {
        MaybeRef::NotRef(Object::Number(number)) => number.as_f64(),
        _ => 0.0,
    }
}
