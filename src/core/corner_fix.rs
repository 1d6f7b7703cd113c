//! Corner-point correction for embedded metadata documents.
//!
//! Certain upstream producers write an erroneous northeast corner into the
//! spatial-extent block of exported containers. The authoritative values are
//! the document's own dimension counts and cell resolutions:
//! `northeast = southwest + (count - 1) * resolution`, per axis. The
//! correction rewrites only the text of the coordinate-pair element and
//! leaves every other byte of the document alone, so unrelated metadata
//! survives round-trips untouched.

use std::path::Path;

use quick_xml::events::{BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::io::container::{ContainerStore, OpenMode};
use crate::types::{BagError, BagResult};

/// Values scraped from the extent block on the first pass.
struct ExtentParams {
    rows: i64,
    cols: i64,
    x_res: f64,
    y_res: f64,
    coords: [f64; 4],
}

#[derive(Clone, Copy, PartialEq)]
enum Capture {
    DimensionInteger,
    ResolutionMeasure,
    Coordinates,
}

fn malformed(msg: impl Into<String>) -> BagError {
    BagError::MalformedMetadata(msg.into())
}

/// Scan the document for the first two dimension counts, the first two
/// resolutions, and the coordinate-pair text. Element names are matched by
/// local name so the namespace prefixes in the wild (`gmd:`, `gco:`,
/// `gml:`) do not matter.
fn scan_extent(doc: &[u8]) -> BagResult<ExtentParams> {
    let mut reader = Reader::from_reader(doc);
    let mut buf = Vec::new();

    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut capture: Option<Capture> = None;
    let mut text = String::new();

    let mut dims: Vec<i64> = Vec::new();
    let mut res: Vec<f64> = Vec::new();
    let mut coords_text: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let local = e.local_name().as_ref().to_vec();
                let parent = stack.last().map(|p| p.as_slice());
                capture = match (local.as_slice(), parent) {
                    (b"Integer", Some(b"dimensionSize")) if dims.len() < 2 => {
                        Some(Capture::DimensionInteger)
                    }
                    (b"Measure", Some(b"resolution")) if res.len() < 2 => {
                        Some(Capture::ResolutionMeasure)
                    }
                    (b"coordinates", _) if coords_text.is_none() => Some(Capture::Coordinates),
                    _ => None,
                };
                text.clear();
                stack.push(local);
            }
            Ok(Event::Text(t)) => {
                if capture.is_some() {
                    text.push_str(
                        &t.unescape()
                            .map_err(|e| malformed(format!("bad text content: {e}")))?,
                    );
                }
            }
            Ok(Event::End(_)) => {
                match capture.take() {
                    Some(Capture::DimensionInteger) => {
                        let value = text.trim().parse::<i64>().map_err(|_| {
                            malformed(format!("dimension size '{}' is not an integer", text.trim()))
                        })?;
                        dims.push(value);
                    }
                    Some(Capture::ResolutionMeasure) => {
                        let value = text.trim().parse::<f64>().map_err(|_| {
                            malformed(format!("resolution '{}' is not numeric", text.trim()))
                        })?;
                        res.push(value);
                    }
                    Some(Capture::Coordinates) => {
                        coords_text = Some(text.trim().to_string());
                    }
                    None => {}
                }
                stack.pop();
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(malformed(format!("unreadable metadata document: {e}"))),
        }
        buf.clear();
    }

    if dims.len() < 2 {
        return Err(malformed("missing row/column dimension sizes"));
    }
    if res.len() < 2 {
        return Err(malformed("missing x/y resolution measures"));
    }
    let coords_text = coords_text.ok_or_else(|| malformed("missing corner coordinates"))?;

    let pairs: Vec<&str> = coords_text.split_whitespace().collect();
    let values: Vec<f64> = pairs
        .iter()
        .flat_map(|pair| pair.split(','))
        .map(|v| v.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|_| malformed(format!("unparseable corner coordinates '{coords_text}'")))?;
    if pairs.len() != 2 || values.len() != 4 {
        return Err(malformed(format!(
            "expected two corner coordinate pairs, got '{coords_text}'"
        )));
    }

    let (rows, cols) = (dims[0], dims[1]);
    if rows <= 0 || cols <= 0 {
        return Err(malformed(format!("non-positive grid shape {rows}x{cols}")));
    }

    Ok(ExtentParams {
        rows,
        cols,
        x_res: res[0],
        y_res: res[1],
        coords: [values[0], values[1], values[2], values[3]],
    })
}

/// Return a copy of the document with the northeast corner recomputed from
/// the dimension counts and resolutions.
pub fn corrected_document(doc: &[u8]) -> BagResult<Vec<u8>> {
    let params = scan_extent(doc)?;

    let [sw_x, sw_y, _, _] = params.coords;
    let ne_x = sw_x + (params.cols - 1) as f64 * params.x_res;
    let ne_y = sw_y + (params.rows - 1) as f64 * params.y_res;
    let corrected = format!("{sw_x},{sw_y} {ne_x},{ne_y}");

    let mut reader = Reader::from_reader(doc);
    let mut writer = Writer::new(Vec::new());
    let mut buf = Vec::new();
    let mut in_coords = false;
    let mut replaced = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) => {
                let open_coords = !replaced && e.local_name().as_ref() == b"coordinates";
                writer
                    .write_event(Event::Start(e))
                    .map_err(|e| malformed(format!("rewrite failed: {e}")))?;
                if open_coords {
                    writer
                        .write_event(Event::Text(BytesText::new(&corrected)))
                        .map_err(|e| malformed(format!("rewrite failed: {e}")))?;
                    in_coords = true;
                    replaced = true;
                }
            }
            // the stale corner text is dropped in favor of the injected value
            Ok(Event::Text(_)) if in_coords => {}
            Ok(Event::CData(_)) if in_coords => {}
            Ok(Event::End(e)) => {
                if in_coords && e.local_name().as_ref() == b"coordinates" {
                    in_coords = false;
                }
                writer
                    .write_event(Event::End(e))
                    .map_err(|e| malformed(format!("rewrite failed: {e}")))?;
            }
            Ok(event) => {
                writer
                    .write_event(event)
                    .map_err(|e| malformed(format!("rewrite failed: {e}")))?;
            }
            Err(e) => return Err(malformed(format!("unreadable metadata document: {e}"))),
        }
        buf.clear();
    }

    log::debug!(
        "corner points recomputed: {} ({} x {} cells at {} x {})",
        corrected,
        params.rows,
        params.cols,
        params.x_res,
        params.y_res
    );
    Ok(writer.into_inner())
}

fn rewrite_document(store: &dyn ContainerStore, output: &Path) -> BagResult<()> {
    let mut handle = store.open(output, OpenMode::ReadWrite)?;
    let doc = handle.metadata_document()?;
    let fixed = corrected_document(&doc)?;
    handle.replace_metadata_document(&fixed)
}

/// Produce a geometry-corrected copy of `input` at `output`. The input
/// container is never touched; a failed correction removes the partial copy.
pub fn fix_corner_points(
    store: &dyn ContainerStore,
    input: &Path,
    output: &Path,
) -> BagResult<()> {
    store.copy(input, output)?;

    match rewrite_document(store, output) {
        Ok(()) => {
            log::info!(
                "corner points fixed for '{}' -> '{}'",
                input.display(),
                output.display()
            );
            Ok(())
        }
        Err(e) => {
            let _ = store.remove(output);
            Err(e)
        }
    }
}
