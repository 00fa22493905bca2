//! Discovery of reachable indirect objects and their at-most-once copy.

use crate::primitive::WriteIndirect;
use crate::trace::warn;
use crate::{EmbedError, PdfEmbedder};
use hayro_syntax::object::dict::keys::RESOURCES;
use hayro_syntax::object::{Array, Dict, MaybeRef, ObjRef, Object};
use pdf_writer::{Chunk, Ref};
use std::collections::HashSet;

/// Copy every indirect object transitively reachable from the page's
/// resources dictionary into the destination.
///
/// Must run before the page's artifact is finalized: by the time the resources
/// dictionary of the artifact is produced, every reference that occurs in it
/// has to resolve to an already-mapped destination object.
pub(crate) fn copy_resources(
    session: &mut PdfEmbedder<'_>,
    page: &Dict<'_>,
) -> Result<(), EmbedError> {
    // No resources... as weird as that might be, let it be.
    let Some(resources) = page.get::<Dict<'_>>(RESOURCES) else {
        return Ok(());
    };

    let mut to_write = Vec::new();
    register_dict(session, &resources, &mut to_write);

    let mut emitted = HashSet::new();
    write_new_objects(session, &to_write, &mut emitted)
}

// Keys are assumed to be direct objects and aren't scanned.
fn register_dict(session: &PdfEmbedder<'_>, dict: &Dict<'_>, out: &mut Vec<ObjRef>) {
    for (_, value) in dict.entries() {
        register_value(session, &value, out);
    }
}

fn register_array(session: &PdfEmbedder<'_>, array: &Array<'_>, out: &mut Vec<ObjRef>) {
    for item in array.raw_iter() {
        register_value(session, &item, out);
    }
}

fn register_value(session: &PdfEmbedder<'_>, value: &MaybeRef<Object<'_>>, out: &mut Vec<ObjRef>) {
    match value {
        MaybeRef::Ref(id) => {
            if !session.source_to_target.contains_key(id) {
                out.push(*id);
            }
        }
        MaybeRef::NotRef(Object::Array(array)) => register_array(session, array, out),
        MaybeRef::NotRef(Object::Dict(dict)) => register_dict(session, dict, out),
        MaybeRef::NotRef(_) => {}
    }
}

/// Emit the listed source objects, then whatever their bodies turn out to
/// reference, until the reachable subgraph is closed over.
fn write_new_objects(
    session: &mut PdfEmbedder<'_>,
    sources: &[ObjRef],
    emitted: &mut HashSet<ObjRef>,
) -> Result<(), EmbedError> {
    for source in sources {
        // An earlier object of this batch may already have pulled this one in.
        if emitted.contains(source) {
            continue;
        }

        let target = session.target_ref(*source);

        // Marked before the body is written, so cycles and self-references
        // resolve to the already-allocated target instead of re-enqueueing.
        emitted.insert(*source);

        copy_indirect_object(session, *source, target, emitted)?;
    }

    Ok(())
}

fn copy_indirect_object<'a>(
    session: &mut PdfEmbedder<'a>,
    source: ObjRef,
    target: Ref,
    emitted: &mut HashSet<ObjRef>,
) -> Result<(), EmbedError> {
    let pdf = session.pdf;
    let Some(object) = pdf.xref().get::<Object<'_>>(source.into()) else {
        warn!("source object {source:?} not found");
        return Err(EmbedError::Parse);
    };

    let mut chunk = Chunk::new();
    let mut discovered = Vec::new();
    object.write_indirect(&mut chunk, target, session, &mut discovered)?;
    session.chunk.extend(&chunk);

    write_new_objects(session, &discovered, emitted)
}
