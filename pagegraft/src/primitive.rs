//! Writing parsed source objects into the destination, rewriting indirect
//! references through the session's identifier map.

use crate::content::declared_body;
use crate::trace::warn;
use crate::{EmbedError, PdfEmbedder};
use hayro_syntax::object;
use hayro_syntax::object::dict::keys::LENGTH;
use hayro_syntax::object::{MaybeRef, ObjRef, Object, Stream};
use pdf_writer::{Chunk, Dict, Obj, Ref};
use std::ops::Deref;
use std::ops::DerefMut;

/// Writing a value in direct position (array item, dictionary value, or the
/// body of a non-stream indirect object).
pub(crate) trait WriteDirect {
    /// Write `self` into the given destination slot.
    ///
    /// References to objects the session has not seen yet are allocated in the
    /// identifier map and appended to `discovered`; the caller is responsible
    /// for copying their bodies.
    fn write_direct(
        &self,
        obj: Obj<'_>,
        session: &mut PdfEmbedder<'_>,
        discovered: &mut Vec<ObjRef>,
    ) -> Result<(), EmbedError>;
}

impl WriteDirect for ObjRef {
    fn write_direct(
        &self,
        obj: Obj<'_>,
        session: &mut PdfEmbedder<'_>,
        discovered: &mut Vec<ObjRef>,
    ) -> Result<(), EmbedError> {
        if !session.source_to_target.contains_key(self) {
            discovered.push(*self);
        }

        // The destination reference is always generation zero.
        let mapped = session.target_ref(*self);
        obj.primitive(mapped);

        Ok(())
    }
}

impl WriteDirect for object::Number {
    fn write_direct(
        &self,
        obj: Obj<'_>,
        _: &mut PdfEmbedder<'_>,
        _: &mut Vec<ObjRef>,
    ) -> Result<(), EmbedError> {
        let value = self.as_f64();

        if value.fract() == 0.0 {
            obj.primitive(value as i32);
        } else {
            obj.primitive(value as f32);
        }

        Ok(())
    }
}

impl WriteDirect for bool {
    fn write_direct(
        &self,
        obj: Obj<'_>,
        _: &mut PdfEmbedder<'_>,
        _: &mut Vec<ObjRef>,
    ) -> Result<(), EmbedError> {
        obj.primitive(*self);

        Ok(())
    }
}

impl WriteDirect for object::Null {
    fn write_direct(
        &self,
        obj: Obj<'_>,
        _: &mut PdfEmbedder<'_>,
        _: &mut Vec<ObjRef>,
    ) -> Result<(), EmbedError> {
        obj.primitive(pdf_writer::Null);

        Ok(())
    }
}

impl WriteDirect for object::String<'_> {
    fn write_direct(
        &self,
        obj: Obj<'_>,
        _: &mut PdfEmbedder<'_>,
        _: &mut Vec<ObjRef>,
    ) -> Result<(), EmbedError> {
        obj.primitive(pdf_writer::Str(self.as_bytes()));

        Ok(())
    }
}

impl WriteDirect for object::Name<'_> {
    fn write_direct(
        &self,
        obj: Obj<'_>,
        _: &mut PdfEmbedder<'_>,
        _: &mut Vec<ObjRef>,
    ) -> Result<(), EmbedError> {
        obj.primitive(pdf_writer::Name(self.deref()));

        Ok(())
    }
}

impl WriteDirect for object::Array<'_> {
    fn write_direct(
        &self,
        obj: Obj<'_>,
        session: &mut PdfEmbedder<'_>,
        discovered: &mut Vec<ObjRef>,
    ) -> Result<(), EmbedError> {
        let mut array = obj.array();

        for item in self.raw_iter() {
            item.write_direct(array.push(), session, discovered)?;
        }

        Ok(())
    }
}

impl WriteDirect for object::Dict<'_> {
    fn write_direct(
        &self,
        obj: Obj<'_>,
        session: &mut PdfEmbedder<'_>,
        discovered: &mut Vec<ObjRef>,
    ) -> Result<(), EmbedError> {
        let mut dict = obj.dict();

        write_dict_entries(self, &mut dict, session, discovered, false)
    }
}

impl<T: WriteDirect> WriteDirect for MaybeRef<T> {
    fn write_direct(
        &self,
        obj: Obj<'_>,
        session: &mut PdfEmbedder<'_>,
        discovered: &mut Vec<ObjRef>,
    ) -> Result<(), EmbedError> {
        match self {
            MaybeRef::Ref(id) => id.write_direct(obj, session, discovered),
            MaybeRef::NotRef(value) => value.write_direct(obj, session, discovered),
        }
    }
}

impl WriteDirect for Object<'_> {
    fn write_direct(
        &self,
        obj: Obj<'_>,
        session: &mut PdfEmbedder<'_>,
        discovered: &mut Vec<ObjRef>,
    ) -> Result<(), EmbedError> {
        match self {
            Object::Null(n) => n.write_direct(obj, session, discovered),
            Object::Boolean(b) => b.write_direct(obj, session, discovered),
            Object::Number(n) => n.write_direct(obj, session, discovered),
            Object::String(s) => s.write_direct(obj, session, discovered),
            Object::Name(n) => n.write_direct(obj, session, discovered),
            Object::Dict(d) => d.write_direct(obj, session, discovered),
            Object::Array(a) => a.write_direct(obj, session, discovered),
            Object::Stream(_) => {
                // A stream can only live in the cross-reference table; one in
                // value position can't arise from well-formed input and is
                // dropped without failing the whole copy.
                warn!("refusing to write a stream in value position");

                Ok(())
            }
        }
    }
}

/// Write the entries of a source dictionary in exactly the order the parser
/// yields them. `is_stream` drops the source's `Length`, which the
/// destination stream writer re-emits itself.
fn write_dict_entries(
    source: &object::Dict<'_>,
    target: &mut Dict<'_>,
    session: &mut PdfEmbedder<'_>,
    discovered: &mut Vec<ObjRef>,
    is_stream: bool,
) -> Result<(), EmbedError> {
    for (key, value) in source.entries() {
        if is_stream && key.deref() == LENGTH {
            continue;
        }

        value.write_direct(target.insert(pdf_writer::Name(key.deref())), session, discovered)?;
    }

    Ok(())
}

/// Writing the body of an indirect object.
pub(crate) trait WriteIndirect {
    /// Write `self` as the indirect object `id` of the destination.
    fn write_indirect(
        &self,
        chunk: &mut Chunk,
        id: Ref,
        session: &mut PdfEmbedder<'_>,
        discovered: &mut Vec<ObjRef>,
    ) -> Result<(), EmbedError>;
}

impl WriteIndirect for Stream<'_> {
    fn write_indirect(
        &self,
        chunk: &mut Chunk,
        id: Ref,
        session: &mut PdfEmbedder<'_>,
        discovered: &mut Vec<ObjRef>,
    ) -> Result<(), EmbedError> {
        // Standalone streams are copied raw, whatever their filter chain; the
        // dictionary keeps all entries, so the filters still apply.
        let body = declared_body(self)?;

        let mut target = chunk.stream(id, &body);

        write_dict_entries(self.dict(), target.deref_mut(), session, discovered, true)
    }
}

impl WriteIndirect for Object<'_> {
    fn write_indirect(
        &self,
        chunk: &mut Chunk,
        id: Ref,
        session: &mut PdfEmbedder<'_>,
        discovered: &mut Vec<ObjRef>,
    ) -> Result<(), EmbedError> {
        match self {
            Object::Stream(stream) => stream.write_indirect(chunk, id, session, discovered),
            other => other.write_direct(chunk.indirect(id), session, discovered),
        }
    }
}
