//! MP4/M4B atom-tree parser.
//!
//! Walks `ftyp`/`moov` at the top level, then `moov -> udta -> {meta,
//! chpl}` for tags and chapters. Every atom size is bounds-checked against
//! the remaining buffer before it is trusted; a truncated or lying atom
//! size yields [`ParseError::OutOfBounds`] rather than an out-of-range
//! slice panic.

use std::path::Path;
use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::ParseError;
use crate::models::{Chapter, Metadata};

use super::BoundedReader;

lazy_static! {
    static ref SERIES_PART_IN_TEXT: Regex = Regex::new(r"(?i)(?:book|part|volume|vol\.?)\s*#?\s*(\d+(?:\.\d+)?)").unwrap();
}

struct Atom<'a> {
    kind: [u8; 4],
    /// Byte offset of the atom's payload within the buffer it was read from.
    payload_start: usize,
    payload_len: usize,
    data: &'a [u8],
}

/// Reads the atoms directly contained in `buf`, stopping cleanly at the
/// end of the buffer. An atom whose declared size would run past the end
/// of `buf` is reported as `OutOfBounds` rather than silently truncated.
fn read_atoms<'a>(buf: &'a [u8]) -> Result<Vec<Atom<'a>>, ParseError> {
    let mut atoms = Vec::new();
    let mut reader = BoundedReader::new(buf);

    while reader.remaining() >= 8 {
        let atom_start = reader.position();
        let size32 = reader.read_u32_be()?;
        let kind_bytes = reader.read_bytes(4)?;
        let mut kind = [0u8; 4];
        kind.copy_from_slice(kind_bytes);

        let (total_size, header_len) = if size32 == 1 {
            let size64 = reader.read_u64_be()?;
            (size64 as usize, 16usize)
        } else if size32 == 0 {
            // Extends to end of buffer; rare, mostly in top-level mdat.
            (buf.len() - atom_start, 8usize)
        } else {
            (size32 as usize, 8usize)
        };

        if total_size < header_len || atom_start + total_size > buf.len() {
            return Err(ParseError::out_of_bounds(
                atom_start,
                total_size,
                buf.len(),
                format!("atom '{}' size", String::from_utf8_lossy(&kind)),
            ));
        }

        let payload_start = atom_start + header_len;
        let payload_len = total_size - header_len;
        atoms.push(Atom {
            kind,
            payload_start,
            payload_len,
            data: &buf[payload_start..payload_start + payload_len],
        });
        reader.seek(atom_start + total_size)?;
    }

    Ok(atoms)
}

fn find<'a, 'b>(atoms: &'b [Atom<'a>], kind: &[u8; 4]) -> Option<&'b Atom<'a>> {
    atoms.iter().find(|a| &a.kind == kind)
}

/// Parses the `ftyp` major brand into a human-readable container format.
fn format_from_ftyp(ftyp_payload: &[u8]) -> Result<&'static str, ParseError> {
    if ftyp_payload.len() < 4 {
        return Err(ParseError::corrupted(0, "ftyp atom too short for major brand"));
    }
    match &ftyp_payload[0..4] {
        b"M4B " => Ok("M4B"),
        b"M4A " | b"mp42" | b"isom" => Ok("M4A"),
        other => Err(ParseError::unsupported(format!(
            "unrecognized ftyp major brand: {:?}",
            String::from_utf8_lossy(other)
        ))),
    }
}

/// Reads a `data` sub-atom's text payload: an 8-byte prefix (type
/// indicator, locale) followed by UTF-8 bytes, NUL- and whitespace-trimmed.
fn read_data_text(atoms: &[Atom], context: &str) -> Option<String> {
    let data = find(atoms, b"data")?;
    if data.payload_len < 8 {
        return None;
    }
    let text_bytes = &data.data[8..];
    let text = String::from_utf8_lossy(text_bytes);
    let trimmed = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    if trimmed.is_empty() {
        None
    } else {
        tracing::trace!(context, "read ilst text field");
        Some(trimmed.to_string())
    }
}

fn ilst_atom_code(name: &str) -> [u8; 4] {
    let mut kind = [0u8; 4];
    let bytes = name.as_bytes();
    kind[0] = 0xA9;
    kind[1] = bytes[0];
    kind[2] = bytes[1];
    kind[3] = bytes[2];
    kind
}

fn parse_custom_atom<'a>(atom: &Atom<'a>) -> Result<Option<(String, String)>, ParseError> {
    let children = read_atoms(atom.data)?;
    // `mean` carries the atom's namespace; this pipeline does not
    // discriminate by namespace, only by field name.
    let name = find(&children, b"name");

    let value = match read_data_text(&children, "custom atom") {
        Some(v) => v,
        None => return Ok(None),
    };

    let field_name = match name.and_then(|n| {
        if n.payload_len < 4 {
            return None;
        }
        let raw = String::from_utf8_lossy(&n.data[4..]);
        let trimmed = raw.trim_matches('\0').trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }) {
        Some(f) => f,
        None => return Ok(None),
    };

    Ok(Some((field_name, value)))
}

/// Reads a `trkn`/`disk`-style `data` sub-atom: an 8-byte prefix, then
/// 2 bytes padding, a big-endian `u16` number, a big-endian `u16` total,
/// and 2 trailing padding bytes. A zero value means "not set".
fn read_data_u16_pair(atoms: &[Atom]) -> Option<(Option<u32>, Option<u32>)> {
    let data = find(atoms, b"data")?;
    if data.payload_len < 16 {
        return None;
    }
    let number = u16::from_be_bytes([data.data[10], data.data[11]]) as u32;
    let total = u16::from_be_bytes([data.data[12], data.data[13]]) as u32;
    Some((
        if number == 0 { None } else { Some(number) },
        if total == 0 { None } else { Some(total) },
    ))
}

fn parse_mvhd_duration(mvhd: &[u8]) -> Option<Duration> {
    let mut reader = BoundedReader::new(mvhd);
    let version = reader.read_u8().ok()?;
    reader.advance(3).ok()?; // flags

    if version == 1 {
        reader.advance(8 + 8).ok()?; // creation/modification time, 64-bit each
        let timescale = reader.read_u32_be().ok()?;
        let duration = reader.read_u64_be().ok()?;
        if timescale == 0 {
            return None;
        }
        Some(Duration::from_secs_f64(duration as f64 / timescale as f64))
    } else {
        reader.advance(4 + 4).ok()?; // creation/modification time, 32-bit each
        let timescale = reader.read_u32_be().ok()?;
        let duration = reader.read_u32_be().ok()?;
        if timescale == 0 {
            return None;
        }
        Some(Duration::from_secs_f64(duration as f64 / timescale as f64))
    }
}

fn parse_chpl(chpl: &[u8], total_duration: Duration) -> Vec<Chapter> {
    let mut chapters = Vec::new();

    let parse = || -> Result<Vec<(Duration, String)>, ParseError> {
        let mut r = BoundedReader::new(chpl);
        r.advance(1 + 3 + 4)?; // version, flags, reserved
        let count = r.read_u8()?;
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let start_100ns = r.read_u64_be()?;
            let title_len = r.read_u8()?;
            let title_bytes = r.read_bytes(title_len as usize)?;
            let title = String::from_utf8_lossy(title_bytes).trim().to_string();
            entries.push((Duration::from_secs_f64(start_100ns as f64 / 10_000_000.0), title));
        }
        Ok(entries)
    };

    let entries = match parse() {
        Ok(e) => e,
        Err(_) => return Vec::new(),
    };

    for (i, (start, title)) in entries.iter().enumerate() {
        let end = entries.get(i + 1).map(|(s, _)| *s).unwrap_or(total_duration);
        chapters.push(Chapter {
            index: i as u32 + 1,
            title: title.clone(),
            start_time: *start,
            end_time: end,
        });
    }

    chapters
}

/// A track number is a plausible series position when both it and the
/// track total are present and the number sits in the front quarter of
/// the total (e.g. book 2 of a 9-part run, not disc 7 of 8 audio files).
fn track_number_looks_like_series_position(track_number: Option<u32>, track_total: Option<u32>) -> Option<String> {
    let number = track_number?;
    let total = track_total?;
    if number == 0 || total == 0 || number > total {
        return None;
    }
    if (number as f64) <= (total as f64) / 4.0 {
        Some(number.to_string())
    } else {
        None
    }
}

fn resolve_series_part(
    ilst_text: &std::collections::HashMap<String, String>,
    track_number: Option<u32>,
    track_total: Option<u32>,
    folder: &Path,
) -> Option<String> {
    for key in ["Series Part", "Series Position", "Part", "Volume"] {
        if let Some(v) = ilst_text.get(key) {
            return Some(v.clone());
        }
    }
    if let Some(part) = track_number_looks_like_series_position(track_number, track_total) {
        return Some(part);
    }
    if let Some(title) = ilst_text.get("title") {
        if let Some(caps) = SERIES_PART_IN_TEXT.captures(title) {
            return Some(caps[1].to_string());
        }
    }
    if let Some(album) = ilst_text.get("album") {
        if let Some(caps) = SERIES_PART_IN_TEXT.captures(album) {
            return Some(caps[1].to_string());
        }
    }
    if let Some(name) = folder.file_name().and_then(|n| n.to_str()) {
        if let Some(caps) = SERIES_PART_IN_TEXT.captures(name) {
            return Some(caps[1].to_string());
        }
    }
    None
}

/// Extracts the raw bytes of the primary embedded artwork (the `covr` atom
/// inside `ilst`), if present. Unlike the text atoms, `covr`'s `data`
/// sub-atom payload (past its own 8-byte prefix) is returned as-is with no
/// text decoding.
pub fn extract_cover(bytes: &[u8]) -> Result<Option<Vec<u8>>, ParseError> {
    let top = read_atoms(bytes)?;
    let moov = match find(&top, b"moov") {
        Some(m) => m,
        None => return Ok(None),
    };
    let moov_children = read_atoms(moov.data)?;
    let udta = match find(&moov_children, b"udta") {
        Some(u) => u,
        None => return Ok(None),
    };
    let udta_children = read_atoms(udta.data)?;
    let meta = match find(&udta_children, b"meta") {
        Some(m) => m,
        None => return Ok(None),
    };
    if meta.payload_len < 4 {
        return Ok(None);
    }
    let meta_children = read_atoms(&meta.data[4..])?;
    let ilst = match find(&meta_children, b"ilst") {
        Some(i) => i,
        None => return Ok(None),
    };
    let ilst_children = read_atoms(ilst.data)?;
    let covr = match find(&ilst_children, b"covr") {
        Some(c) => c,
        None => return Ok(None),
    };
    let covr_children = read_atoms(covr.data)?;
    let data = match find(&covr_children, b"data") {
        Some(d) => d,
        None => return Ok(None),
    };
    if data.payload_len < 8 {
        return Ok(None);
    }
    Ok(Some(data.data[8..].to_vec()))
}

pub fn parse(path: &Path, bytes: &[u8]) -> Result<Metadata, ParseError> {
    let top = read_atoms(bytes)?;

    let ftyp = find(&top, b"ftyp").ok_or_else(|| ParseError::corrupted(0, "missing ftyp atom"))?;
    let format = format_from_ftyp(ftyp.data)?;

    let moov = find(&top, b"moov").ok_or_else(|| ParseError::corrupted(0, "missing moov atom"))?;
    let moov_children = read_atoms(moov.data)?;

    let duration = find(&moov_children, b"mvhd")
        .and_then(|a| parse_mvhd_duration(a.data))
        .unwrap_or(Duration::ZERO);

    let mut metadata = Metadata::new(path.to_path_buf());
    metadata.container_format = Some(format.to_string());
    metadata.duration = duration;
    metadata.file_size = bytes.len() as u64;

    let udta = find(&moov_children, b"udta");
    let udta_children = match udta {
        Some(u) => read_atoms(u.data)?,
        None => Vec::new(),
    };

    let mut text_fields: std::collections::HashMap<String, String> = std::collections::HashMap::new();
    let mut track_number = None;
    let mut track_total = None;

    if let Some(meta) = find(&udta_children, b"meta") {
        if meta.payload_len >= 4 {
            let meta_children = read_atoms(&meta.data[4..])?;
            if let Some(ilst) = find(&meta_children, b"ilst") {
                let ilst_children = read_atoms(ilst.data)?;

                if let Some(trkn) = find(&ilst_children, b"trkn") {
                    let trkn_children = read_atoms(trkn.data)?;
                    if let Some((number, total)) = read_data_u16_pair(&trkn_children) {
                        track_number = number;
                        track_total = total;
                    }
                }

                for (field, code) in [
                    ("title", "nam"),
                    ("artist", "ART"),
                    ("album", "alb"),
                    ("genre", "gen"),
                    ("year", "day"),
                    ("composer", "wrt"),
                    ("comment", "cmt"),
                ] {
                    let code_atom = ilst_atom_code(code);
                    if let Some(atom) = find(&ilst_children, &code_atom) {
                        let children = read_atoms(atom.data)?;
                        if let Some(v) = read_data_text(&children, field) {
                            text_fields.insert(field.to_string(), v);
                        }
                    }
                }

                for atom in ilst_children.iter().filter(|a| &a.kind == b"----") {
                    if let Some((name, value)) = parse_custom_atom(atom)? {
                        text_fields.insert(name, value);
                    }
                }
            }
        }
    }

    metadata.title = text_fields.get("title").cloned();
    metadata.artist = text_fields.get("artist").cloned();
    metadata.album = text_fields.get("album").cloned();
    metadata.genre = text_fields.get("genre").cloned();
    metadata.year = text_fields.get("year").cloned();
    metadata.composer = text_fields.get("composer").cloned();
    metadata.comment = text_fields.get("comment").cloned();
    metadata.track_number = track_number;
    metadata.track_total = track_total;

    for (key, target) in [
        ("Narrator", "narrator"),
        ("Publisher", "publisher"),
        ("Series", "series"),
        ("ISBN", "isbn"),
        ("ASIN", "asin"),
    ] {
        if let Some(v) = text_fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.clone())
        {
            match target {
                "narrator" => metadata.narrator = Some(v),
                "publisher" => metadata.publisher = Some(v),
                "series" => metadata.series = Some(v),
                "isbn" => metadata.isbn = Some(v),
                "asin" => metadata.asin = Some(v),
                _ => unreachable!(),
            }
        }
    }

    if metadata.series.is_some() && metadata.series_part.is_none() {
        metadata.series_part = resolve_series_part(
            &text_fields,
            metadata.track_number,
            metadata.track_total,
            path.parent().unwrap_or(path),
        );
    }

    if let Some(chpl) = find(&udta_children, b"chpl") {
        metadata.chapters = parse_chpl(chpl.data, duration);
    }

    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atom(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&((payload.len() + 8) as u32).to_be_bytes());
        out.extend_from_slice(kind);
        out.extend_from_slice(payload);
        out
    }

    fn data_atom(text: &str) -> Vec<u8> {
        let mut payload = vec![0u8; 8];
        payload.extend_from_slice(text.as_bytes());
        atom(b"data", &payload)
    }

    fn ilst_text_atom(code: [u8; 4], text: &str) -> Vec<u8> {
        atom(&code, &data_atom(text))
    }

    fn trkn_atom(number: u16, total: u16) -> Vec<u8> {
        let mut payload = vec![0u8; 8];
        payload.extend_from_slice(&[0, 0]);
        payload.extend_from_slice(&number.to_be_bytes());
        payload.extend_from_slice(&total.to_be_bytes());
        payload.extend_from_slice(&[0, 0]);
        atom(b"trkn", &atom(b"data", &payload))
    }

    fn build_minimal_m4b(title: &str, duration_secs: u32) -> Vec<u8> {
        let ftyp = atom(b"ftyp", b"M4B \x00\x00\x02\x00isomM4B ");

        let mut mvhd_payload = vec![0u8; 4]; // version+flags
        mvhd_payload.extend_from_slice(&0u32.to_be_bytes()); // creation
        mvhd_payload.extend_from_slice(&0u32.to_be_bytes()); // modification
        mvhd_payload.extend_from_slice(&1000u32.to_be_bytes()); // timescale
        mvhd_payload.extend_from_slice(&(duration_secs * 1000).to_be_bytes()); // duration
        let mvhd = atom(b"mvhd", &mvhd_payload);

        let nam = ilst_text_atom(ilst_atom_code("nam"), title);
        let mut ilst_payload = Vec::new();
        ilst_payload.extend_from_slice(&nam);
        let ilst = atom(b"ilst", &ilst_payload);

        let mut meta_payload = vec![0u8; 4];
        meta_payload.extend_from_slice(&ilst);
        let meta = atom(b"meta", &meta_payload);

        let mut udta_payload = Vec::new();
        udta_payload.extend_from_slice(&meta);
        let udta = atom(b"udta", &udta_payload);

        let mut moov_payload = Vec::new();
        moov_payload.extend_from_slice(&mvhd);
        moov_payload.extend_from_slice(&udta);
        let moov = atom(b"moov", &moov_payload);

        let mut out = Vec::new();
        out.extend_from_slice(&ftyp);
        out.extend_from_slice(&moov);
        out
    }

    fn custom_atom(field_name: &str, value: &str) -> Vec<u8> {
        let mut mean_payload = vec![0u8; 4];
        mean_payload.extend_from_slice(b"com.apple.iTunes");
        let mean = atom(b"mean", &mean_payload);

        let mut name_payload = vec![0u8; 4];
        name_payload.extend_from_slice(field_name.as_bytes());
        let name = atom(b"name", &name_payload);

        let data = data_atom(value);

        let mut children = Vec::new();
        children.extend_from_slice(&mean);
        children.extend_from_slice(&name);
        children.extend_from_slice(&data);
        atom(b"----", &children)
    }

    fn build_m4b_with_ilst(title: &str, extra_ilst_atoms: &[Vec<u8>]) -> Vec<u8> {
        let ftyp = atom(b"ftyp", b"M4B \x00\x00\x02\x00isomM4B ");

        let mut mvhd_payload = vec![0u8; 4];
        mvhd_payload.extend_from_slice(&0u32.to_be_bytes());
        mvhd_payload.extend_from_slice(&0u32.to_be_bytes());
        mvhd_payload.extend_from_slice(&1000u32.to_be_bytes());
        mvhd_payload.extend_from_slice(&60_000u32.to_be_bytes());
        let mvhd = atom(b"mvhd", &mvhd_payload);

        let nam = ilst_text_atom(ilst_atom_code("nam"), title);
        let mut ilst_payload = Vec::new();
        ilst_payload.extend_from_slice(&nam);
        for extra in extra_ilst_atoms {
            ilst_payload.extend_from_slice(extra);
        }
        let ilst = atom(b"ilst", &ilst_payload);

        let mut meta_payload = vec![0u8; 4];
        meta_payload.extend_from_slice(&ilst);
        let meta = atom(b"meta", &meta_payload);

        let udta = atom(b"udta", &meta);

        let mut moov_payload = Vec::new();
        moov_payload.extend_from_slice(&mvhd);
        moov_payload.extend_from_slice(&udta);
        let moov = atom(b"moov", &moov_payload);

        let mut out = Vec::new();
        out.extend_from_slice(&ftyp);
        out.extend_from_slice(&moov);
        out
    }

    fn build_m4b_with_cover(image_bytes: &[u8]) -> Vec<u8> {
        let ftyp = atom(b"ftyp", b"M4B \x00\x00\x02\x00isomM4B ");

        let mut covr_data_payload = vec![0u8; 8];
        covr_data_payload.extend_from_slice(image_bytes);
        let covr = atom(b"covr", &atom(b"data", &covr_data_payload));

        let mut ilst_payload = Vec::new();
        ilst_payload.extend_from_slice(&covr);
        let ilst = atom(b"ilst", &ilst_payload);

        let mut meta_payload = vec![0u8; 4];
        meta_payload.extend_from_slice(&ilst);
        let meta = atom(b"meta", &meta_payload);

        let mut udta_payload = Vec::new();
        udta_payload.extend_from_slice(&meta);
        let udta = atom(b"udta", &udta_payload);

        let moov = atom(b"moov", &udta);
        let mut out = Vec::new();
        out.extend_from_slice(&ftyp);
        out.extend_from_slice(&moov);
        out
    }

    #[test]
    fn extracts_embedded_cover_from_covr_atom() {
        let image_bytes = [0x89u8, 0x50, 0x4E, 0x47, 1, 2, 3];
        let bytes = build_m4b_with_cover(&image_bytes);
        let cover = extract_cover(&bytes).unwrap().unwrap();
        assert_eq!(cover, image_bytes);
    }

    #[test]
    fn parses_title_and_duration_from_minimal_m4b() {
        let bytes = build_minimal_m4b("The Long Way Home", 60);
        let meta = parse(Path::new("book.m4b"), &bytes).unwrap();
        assert_eq!(meta.title.as_deref(), Some("The Long Way Home"));
        assert_eq!(meta.container_format.as_deref(), Some("M4B"));
        assert_eq!(meta.duration, Duration::from_secs(60));
    }

    #[test]
    fn truncated_buffer_reports_out_of_bounds_not_a_panic() {
        let bytes = build_minimal_m4b("Title", 60);
        let truncated = &bytes[..bytes.len() - 20];
        let result = parse(Path::new("book.m4b"), truncated);
        assert!(result.is_err());
    }

    #[test]
    fn missing_ftyp_is_corrupted_not_a_panic() {
        let moov = atom(b"moov", b"");
        let result = parse(Path::new("book.m4b"), &moov);
        assert!(matches!(result, Err(ParseError::Corrupted { .. })));
    }

    #[test]
    fn parses_track_number_from_trkn_atom() {
        let bytes = build_m4b_with_ilst("Chapter One", &[trkn_atom(3, 12)]);
        let meta = parse(Path::new("book.m4b"), &bytes).unwrap();
        assert_eq!(meta.track_number, Some(3));
        assert_eq!(meta.track_total, Some(12));
    }

    #[test]
    fn small_track_number_resolves_series_part_when_no_explicit_field() {
        let series = custom_atom("Series", "The Long Way");
        let bytes = build_m4b_with_ilst("Chapter One", &[series, trkn_atom(2, 9)]);
        let meta = parse(Path::new("book.m4b"), &bytes).unwrap();
        assert_eq!(meta.series.as_deref(), Some("The Long Way"));
        assert_eq!(meta.series_part.as_deref(), Some("2"));
    }

    #[test]
    fn track_number_near_track_total_is_not_treated_as_series_position() {
        let series = custom_atom("Series", "The Long Way");
        let bytes = build_m4b_with_ilst("Chapter One", &[series, trkn_atom(7, 9)]);
        let meta = parse(Path::new("book.m4b"), &bytes).unwrap();
        assert_eq!(meta.series.as_deref(), Some("The Long Way"));
        assert_eq!(meta.series_part, None);
    }

    #[test]
    fn explicit_series_part_atom_wins_over_track_number() {
        let series = custom_atom("Series", "The Long Way");
        let part = custom_atom("Part", "5");
        let bytes = build_m4b_with_ilst("Chapter One", &[series, part, trkn_atom(2, 9)]);
        let meta = parse(Path::new("book.m4b"), &bytes).unwrap();
        assert_eq!(meta.series_part.as_deref(), Some("5"));
    }
}
