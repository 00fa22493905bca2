//! Byte-for-byte passthrough of source content streams.

use crate::EmbedError;
use crate::trace::warn;
use flate2::Compression;
use flate2::write::{ZlibDecoder, ZlibEncoder};
use hayro_syntax::Pdf;
use hayro_syntax::object::dict::keys::{CONTENTS, FILTER, FLATE_DECODE, LENGTH};
use hayro_syntax::object::{Dict, MaybeRef, Object, Stream};
use std::borrow::Cow;
use std::io::Write;
use std::ops::Deref;

/// Copy a page's contents into a single byte sink.
///
/// Flate-compressed segments are inflated on the way so that the concatenation
/// stays plain content-stream text; successive segments are separated by a
/// newline so tokens of adjacent streams can't merge.
pub(crate) fn page_content_to_sink<'a>(
    pdf: &'a Pdf,
    page: &Dict<'a>,
    sink: &mut Vec<u8>,
) -> Result<(), EmbedError> {
    let streams = collect_content_streams(pdf, page)?;

    let mut first = true;
    for stream in &streams {
        if !first {
            sink.push(b'\n');
        }
        copy_stream_payload(stream, sink)?;
        first = false;
    }

    Ok(())
}

/// Copy a page's contents into one buffer per source stream.
///
/// Used when appending pages, where every source segment becomes a fresh
/// stream of the destination page and no separator is needed.
pub(crate) fn page_content_segments<'a>(
    pdf: &'a Pdf,
    page: &Dict<'a>,
) -> Result<Vec<Vec<u8>>, EmbedError> {
    let streams = collect_content_streams(pdf, page)?;

    let mut segments = Vec::with_capacity(streams.len());
    for stream in &streams {
        let mut segment = Vec::new();
        copy_stream_payload(stream, &mut segment)?;
        segments.push(segment);
    }

    Ok(segments)
}

fn collect_content_streams<'a>(
    pdf: &'a Pdf,
    page: &Dict<'a>,
) -> Result<Vec<Stream<'a>>, EmbedError> {
    match page.get::<Object<'_>>(CONTENTS) {
        Some(Object::Stream(stream)) => Ok(vec![stream]),
        Some(Object::Array(array)) => {
            let mut streams = Vec::new();

            for item in array.raw_iter() {
                let MaybeRef::Ref(id) = item else {
                    warn!("content stream array contains non-reference items");
                    return Err(EmbedError::Structure(
                        "content stream array contains non-reference items",
                    ));
                };

                let Some(stream) = pdf.xref().get::<Stream<'_>>(id.into()) else {
                    warn!("content stream array references a non-stream object");
                    return Err(EmbedError::Structure(
                        "content stream array references a non-stream object",
                    ));
                };

                streams.push(stream);
            }

            Ok(streams)
        }
        _ => {
            warn!("page contents are neither a stream nor an array of streams");
            Err(EmbedError::Structure(
                "page contents are neither a stream nor an array of streams",
            ))
        }
    }
}

/// Copy one stream's payload into the sink, raw or inflated.
///
/// Only absent filters and a plain `FlateDecode` name are supported; anything
/// else would require transcoding, which the embedder refuses to do.
pub(crate) fn copy_stream_payload(
    stream: &Stream<'_>,
    sink: &mut Vec<u8>,
) -> Result<(), EmbedError> {
    let body = declared_body(stream)?;

    match stream.dict().get::<Object<'_>>(FILTER) {
        None => {
            sink.extend_from_slice(&body);
            Ok(())
        }
        Some(Object::Name(name)) if name.deref() == FLATE_DECODE => {
            let mut decoder = ZlibDecoder::new(&mut *sink);
            let status = decoder.write_all(&body);
            let status = status.and_then(|()| decoder.finish().map(|_| ()));
            status.map_err(|e| {
                warn!("failed to inflate content stream: {e}");
                EmbedError::Parse
            })
        }
        Some(_) => {
            warn!("can only copy unencoded or Flate-encoded content streams");
            Err(EmbedError::UnsupportedFilter)
        }
    }
}

/// The `Length` bytes a stream declares, starting at its content offset.
pub(crate) fn declared_body<'a>(stream: &Stream<'a>) -> Result<Cow<'a, [u8]>, EmbedError> {
    let Some(declared) = stream.dict().get::<i32>(LENGTH) else {
        warn!("stream does not have an integer length");
        return Err(EmbedError::MissingLength);
    };

    let data = stream.raw_data();
    match usize::try_from(declared) {
        Ok(length) if length <= data.len() => Ok(match data {
            Cow::Borrowed(data) => Cow::Borrowed(&data[..length]),
            Cow::Owned(mut data) => {
                data.truncate(length);
                Cow::Owned(data)
            }
        }),
        _ => {
            warn!(
                "stream declares {declared} content bytes, {} are available",
                data.len()
            );
            Err(EmbedError::Structure(
                "stream Length does not match the available data",
            ))
        }
    }
}

/// Flate-compress the payload of a stream the destination is about to write.
pub(crate) fn deflate_encode(data: &[u8]) -> Vec<u8> {
    const COMPRESSION_LEVEL: u32 = 6;
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(COMPRESSION_LEVEL));
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}
