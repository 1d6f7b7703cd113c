//! Document finalization: schema version and process history.
//!
//! After compositing, the output container's version attribute is moved to
//! the target schema and one process-step entry is appended to the embedded
//! document's lineage section. The lineage append is best-effort by
//! contract: a document without an `LI_Lineage` element is left untouched
//! and reported as [`BagError::LineageSectionMissing`].

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::io::container::ContainerHandle;
use crate::types::{BagError, BagResult, TARGET_VERSION};

/// Description recorded in the appended process step.
pub const PROCESS_DESCRIPTION: &str = "Composite BAG created by bagmerge. Georeferenced \
     metadata layer and value table added; elevation, uncertainty, and keys layers \
     composited from source containers.";

fn xml_err(e: impl std::fmt::Display) -> BagError {
    BagError::XmlParsing(format!("lineage rewrite: {e}"))
}

fn start(writer: &mut Writer<Vec<u8>>, name: &str) -> BagResult<()> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .map_err(xml_err)
}

fn end(writer: &mut Writer<Vec<u8>>, name: &str) -> BagResult<()> {
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(xml_err)
}

fn leaf(writer: &mut Writer<Vec<u8>>, name: &str, value: &str) -> BagResult<()> {
    start(writer, name)?;
    writer
        .write_event(Event::Text(BytesText::new(value)))
        .map_err(xml_err)?;
    end(writer, name)
}

/// Write the processStep subtree, reusing the lineage element's namespace
/// prefix. Documents carrying a prefixed lineage element bind the
/// character-string types under gco.
fn write_process_step(
    writer: &mut Writer<Vec<u8>>,
    prefix: Option<&[u8]>,
    description: &str,
    stamp: &str,
) -> BagResult<()> {
    let gmd = match prefix {
        Some(p) => format!("{}:", String::from_utf8_lossy(p)),
        None => String::new(),
    };
    let gco = if gmd.is_empty() { "" } else { "gco:" };

    start(writer, &format!("{gmd}processStep"))?;
    start(writer, &format!("{gmd}LI_ProcessStep"))?;
    start(writer, &format!("{gmd}description"))?;
    leaf(writer, &format!("{gco}CharacterString"), description)?;
    end(writer, &format!("{gmd}description"))?;
    start(writer, &format!("{gmd}dateTime"))?;
    leaf(writer, &format!("{gco}DateTime"), stamp)?;
    end(writer, &format!("{gmd}dateTime"))?;
    end(writer, &format!("{gmd}LI_ProcessStep"))?;
    end(writer, &format!("{gmd}processStep"))
}

/// Append one `processStep` entry inside the document's first `LI_Lineage`
/// element, reusing that element's namespace prefix for the injected
/// elements. Everything else in the document passes through unchanged.
pub fn append_process_step(
    doc: &[u8],
    description: &str,
    timestamp: DateTime<Utc>,
) -> BagResult<Vec<u8>> {
    let stamp = timestamp.format("%Y-%m-%dT%H:%M:%SZ").to_string();

    let mut reader = Reader::from_reader(doc);
    let mut writer = Writer::new(Vec::new());
    let mut buf = Vec::new();
    let mut appended = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Eof) => break,
            Ok(Event::End(e)) => {
                if !appended && e.local_name().as_ref() == b"LI_Lineage" {
                    let prefix = e.name().prefix().map(|p| p.as_ref().to_vec());
                    write_process_step(&mut writer, prefix.as_deref(), description, &stamp)?;
                    appended = true;
                }
                writer.write_event(Event::End(e)).map_err(xml_err)?;
            }
            // a bare <LI_Lineage/> is expanded so the step has somewhere to go
            Ok(Event::Empty(e)) if !appended && e.local_name().as_ref() == b"LI_Lineage" => {
                let qname = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let prefix = e.name().prefix().map(|p| p.as_ref().to_vec());
                writer.write_event(Event::Start(e)).map_err(xml_err)?;
                write_process_step(&mut writer, prefix.as_deref(), description, &stamp)?;
                writer
                    .write_event(Event::End(BytesEnd::new(qname)))
                    .map_err(xml_err)?;
                appended = true;
            }
            Ok(event) => writer.write_event(event).map_err(xml_err)?,
            Err(e) => return Err(xml_err(e)),
        }
        buf.clear();
    }

    if !appended {
        return Err(BagError::LineageSectionMissing);
    }
    log::debug!("process step appended at {stamp}");
    Ok(writer.into_inner())
}

/// Finalize an output container: set the target schema version on the
/// container header, then append the process-history entry to the embedded
/// document. A missing lineage section propagates as
/// [`BagError::LineageSectionMissing`] with the version already updated and
/// the document intact.
pub fn finalize_document(
    handle: &mut dyn ContainerHandle,
    description: &str,
    timestamp: DateTime<Utc>,
) -> BagResult<()> {
    handle.set_version(TARGET_VERSION)?;
    log::info!("container version set to {TARGET_VERSION}");

    let doc = handle.metadata_document()?;
    let updated = append_process_step(&doc, description, timestamp)?;
    handle.replace_metadata_document(&updated)
}
