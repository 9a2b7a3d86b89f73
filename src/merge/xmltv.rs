//! Streaming XMLTV pull-parser and writer (§4.C, §9 "Iterator/generator XML
//! streaming"). Adapted from the donor app's `xmltv::parser` module, but
//! instead of materialising every channel/programme into a `Vec`, each
//! accepted element is re-serialised straight to the gzip output as it is
//! read — the only state carried across the whole pass is the small
//! `emitted_channels` set and the programme dedup-key set (§4.C "Memory
//! bound").

use std::collections::HashSet;
use std::io::{BufRead, Read, Write};

use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};
use tokio_util::sync::CancellationToken;

use super::error::MergeError;

/// Detect if data is gzip compressed by checking magic bytes (donor's
/// `xmltv::parser::detect_gzip`).
pub fn detect_gzip(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b
}

/// Open a cached source file as a buffered byte reader, transparently
/// decompressing if it is gzip (upstream filenames may be `.xml` or
/// `.xml.gz`, §6).
pub fn open_source(path: &std::path::Path) -> Result<Box<dyn BufRead>, MergeError> {
    let mut file = std::fs::File::open(path)
        .map_err(|e| MergeError::parse(format!("failed to open source {}: {e}", path.display())))?;

    let mut magic = [0u8; 2];
    let n = file
        .read(&mut magic)
        .map_err(|e| MergeError::parse(format!("failed to read source {}: {e}", path.display())))?;
    let file = std::io::BufReader::new(
        std::fs::File::open(path).map_err(|e| MergeError::parse(format!("failed to reopen source: {e}")))?,
    );

    if n == 2 && detect_gzip(&magic) {
        Ok(Box::new(std::io::BufReader::new(flate2::read::GzDecoder::new(file))))
    } else {
        Ok(Box::new(file))
    }
}

fn get_attribute(element: &BytesStart, attr_name: &[u8]) -> Option<String> {
    element
        .attributes()
        .filter_map(|a| a.ok())
        .find(|a| a.key.as_ref() == attr_name)
        .and_then(|a| String::from_utf8(a.value.into_owned()).ok())
}

/// Scan one source's `<channel>` elements and emit (verbatim) any whose
/// `id` is in `selected` and not already in `emitted` (§4.C steps 3a/3b).
/// Returns the number of channels newly emitted from this source.
pub fn emit_channels_from_source<R: BufRead, W: Write>(
    reader: R,
    selected: &HashSet<String>,
    emitted: &mut HashSet<String>,
    out: &mut Writer<W>,
    cancel: &CancellationToken,
) -> Result<usize, MergeError> {
    let mut xml = Reader::from_reader(reader);
    xml.config_mut().trim_text(false);

    let mut buf = Vec::new();
    let mut emitted_count = 0usize;

    loop {
        if cancel.is_cancelled() {
            return Err(MergeError::Cancelled);
        }
        match xml.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"channel" => {
                let id = get_attribute(&e, b"id");
                let wanted = id.as_deref().map(|id| selected.contains(id) && !emitted.contains(id)).unwrap_or(false);

                let events = collect_element(&mut xml, Event::Start(e.into_owned()), b"channel")?;
                if wanted {
                    if let Some(id) = id {
                        emitted.insert(id);
                        emitted_count += 1;
                    }
                    replay(out, &events)?;
                }
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"channel" => {
                let id = get_attribute(&e, b"id");
                if let Some(id) = id {
                    if selected.contains(&id) && !emitted.contains(&id) {
                        out.write_event(Event::Empty(e.into_owned()))
                            .map_err(|err| MergeError::parse(err.to_string()))?;
                        emitted.insert(id);
                        emitted_count += 1;
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(MergeError::parse(format!("XML error: {e}"))),
        }
        buf.clear();
    }

    Ok(emitted_count)
}

/// One programme's dedup key (§4.C "Dedup key rationale"): the title's
/// *inner text only* — nested markup inside `<title>` is ignored (Open
/// Question in spec.md, resolved as "preserve donor behaviour").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProgrammeKey {
    pub channel: String,
    pub start: String,
    pub stop: String,
    pub title: String,
}

/// Scan one source's `<programme>` elements and emit (verbatim) any whose
/// `channel` is in `emitted_channels` and whose dedup key has not been seen
/// before (§4.C step 3c). Returns the number of programmes newly emitted.
pub fn emit_programmes_from_source<R: BufRead, W: Write>(
    reader: R,
    emitted_channels: &HashSet<String>,
    seen: &mut HashSet<ProgrammeKey>,
    out: &mut Writer<W>,
    cancel: &CancellationToken,
) -> Result<usize, MergeError> {
    let mut xml = Reader::from_reader(reader);
    xml.config_mut().trim_text(false);

    let mut buf = Vec::new();
    let mut emitted_count = 0usize;

    loop {
        if cancel.is_cancelled() {
            return Err(MergeError::Cancelled);
        }
        match xml.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"programme" => {
                let channel = get_attribute(&e, b"channel");
                let start = get_attribute(&e, b"start");
                let stop = get_attribute(&e, b"stop");

                let in_scope = channel
                    .as_deref()
                    .map(|c| emitted_channels.contains(c))
                    .unwrap_or(false);

                let events = collect_element(&mut xml, Event::Start(e.into_owned()), b"programme")?;

                if in_scope {
                    if let (Some(channel), Some(start), Some(stop)) = (channel, start, stop) {
                        let title = first_title_text(&events);
                        let key = ProgrammeKey { channel, start, stop, title };
                        if seen.insert(key) {
                            replay(out, &events)?;
                            emitted_count += 1;
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(MergeError::parse(format!("XML error: {e}"))),
        }
        buf.clear();
    }

    Ok(emitted_count)
}

/// Consume and buffer every event from `start` up to and including its
/// matching end tag, so the element can be replayed verbatim.
fn collect_element<R: BufRead>(
    xml: &mut Reader<R>,
    start: Event<'static>,
    tag: &[u8],
) -> Result<Vec<Event<'static>>, MergeError> {
    let mut events = vec![start];
    let mut buf = Vec::new();
    let mut depth = 1usize;

    loop {
        match xml.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == tag => {
                depth += 1;
                events.push(Event::Start(e.into_owned()));
            }
            Ok(Event::End(e)) if e.name().as_ref() == tag => {
                depth -= 1;
                events.push(Event::End(e.into_owned()));
                if depth == 0 {
                    return Ok(events);
                }
            }
            Ok(Event::Eof) => {
                return Err(MergeError::parse(format!(
                    "unexpected EOF while reading <{}>",
                    String::from_utf8_lossy(tag)
                )))
            }
            Ok(other) => events.push(other.into_owned()),
            Err(e) => return Err(MergeError::parse(format!("XML error: {e}"))),
        }
        buf.clear();
    }
}

fn first_title_text(events: &[Event<'static>]) -> String {
    let mut in_title = false;
    let mut title_depth = 0usize;
    let mut text = String::new();
    let mut found = false;

    for event in events {
        match event {
            Event::Start(e) if e.name().as_ref() == b"title" && !found => {
                in_title = true;
                title_depth = 1;
            }
            Event::Start(e) if in_title && e.name().as_ref() != b"title" => {
                title_depth += 1;
            }
            Event::End(e) if in_title && e.name().as_ref() == b"title" && title_depth == 1 => {
                in_title = false;
                found = true;
            }
            Event::End(_) if in_title => {
                title_depth -= 1;
            }
            Event::Text(t) if in_title => {
                if let Ok(unescaped) = t.unescape() {
                    text.push_str(&unescaped);
                }
            }
            _ => {}
        }
    }

    text
}

fn replay<W: Write>(out: &mut Writer<W>, events: &[Event<'static>]) -> Result<(), MergeError> {
    for event in events {
        out.write_event(event).map_err(|e| MergeError::parse(e.to_string()))?;
    }
    Ok(())
}
