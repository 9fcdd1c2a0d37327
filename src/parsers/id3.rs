//! ID3v2 tag and MPEG frame header parser for MP3 files.

use std::path::Path;
use std::time::Duration;

use crate::error::ParseError;
use crate::models::Metadata;

use super::BoundedReader;

const MPEG1_LAYER3_BITRATES_KBPS: [u32; 16] = [
    0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 0,
];
const MPEG1_SAMPLE_RATES: [u32; 4] = [44100, 48000, 32000, 0];

struct Id3Tag {
    size: usize,
    fields: std::collections::HashMap<String, String>,
    cover: Option<Vec<u8>>,
}

/// Reads a synchsafe 28-bit size: four bytes, each with its high bit clear.
fn read_synchsafe_u32(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(0u32, |acc, b| (acc << 7) | (*b & 0x7F) as u32)
}

fn parse_id3v2(bytes: &[u8]) -> Option<Id3Tag> {
    if bytes.len() < 10 || &bytes[0..3] != b"ID3" {
        return None;
    }
    let major_version = bytes[3];
    let tag_size = read_synchsafe_u32(&bytes[6..10]) as usize;
    // A size claiming more than the file actually holds is clamped rather
    // than treated as absence of a tag: whatever frames fit in the
    // truncated window are still recovered.
    let total_size = (10 + tag_size).min(bytes.len());

    let mut fields = std::collections::HashMap::new();
    let mut cover = None;
    let mut reader = BoundedReader::new(&bytes[10..total_size]);

    while reader.remaining() > 10 {
        let id_bytes = match reader.read_bytes(4) {
            Ok(b) => b,
            Err(_) => break,
        };
        if id_bytes == [0, 0, 0, 0] {
            break; // padding
        }
        let id = String::from_utf8_lossy(id_bytes).to_string();

        let frame_size = match reader.read_bytes(4) {
            Ok(b) => {
                if major_version >= 4 {
                    read_synchsafe_u32(b) as usize
                } else {
                    u32::from_be_bytes(b.try_into().unwrap()) as usize
                }
            }
            Err(_) => break,
        };
        let _flags = match reader.read_bytes(2) {
            Ok(b) => b,
            Err(_) => break,
        };
        let data = match reader.read_bytes(frame_size) {
            Ok(b) => b,
            Err(_) => break,
        };

        if id == "APIC" {
            if cover.is_none() {
                cover = decode_apic(data);
            }
        } else if id == "TXXX" {
            if let Some((desc, value)) = decode_txxx(data) {
                fields.insert(format!("TXXX:{}", desc.to_ascii_lowercase()), value);
            }
        } else if let Some(text) = decode_text_frame(data) {
            fields.insert(id, text);
        }
    }

    Some(Id3Tag {
        size: total_size,
        fields,
        cover,
    })
}

/// `APIC` frame layout: encoding (1) + MIME type (NUL-terminated ASCII) +
/// picture type (1) + description (NUL-terminated, encoding-dependent) +
/// raw picture bytes to the end of the frame.
fn decode_apic(data: &[u8]) -> Option<Vec<u8>> {
    if data.is_empty() {
        return None;
    }
    let mut pos = 1; // skip encoding byte
    let mime_end = data[pos..].iter().position(|&b| b == 0)? + pos;
    pos = mime_end + 1;
    pos += 1; // picture type byte
    let desc_end = data[pos..].iter().position(|&b| b == 0)? + pos;
    pos = desc_end + 1;
    if pos > data.len() {
        return None;
    }
    Some(data[pos..].to_vec())
}

/// Extracts the primary embedded picture from an MP3's `APIC` frame, if
/// present.
pub fn extract_cover(bytes: &[u8]) -> Option<Vec<u8>> {
    parse_id3v2(bytes).and_then(|t| t.cover)
}

fn decode_text_frame(data: &[u8]) -> Option<String> {
    if data.is_empty() {
        return None;
    }
    let (encoding, rest) = (data[0], &data[1..]);
    let text = decode_encoded_text(encoding, rest);
    let trimmed = text.trim_matches(|c: char| c == '\0').trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn decode_txxx(data: &[u8]) -> Option<(String, String)> {
    if data.is_empty() {
        return None;
    }
    let encoding = data[0];
    let rest = &data[1..];
    let sep = rest.iter().position(|&b| b == 0)?;
    let desc = decode_encoded_text(encoding, &rest[..sep]);
    let value = decode_encoded_text(encoding, &rest[sep + 1..]);
    let value = value.trim_matches('\0').trim();
    if value.is_empty() {
        None
    } else {
        Some((desc.trim().to_string(), value.to_string()))
    }
}

fn decode_encoded_text(encoding: u8, bytes: &[u8]) -> String {
    match encoding {
        0 => String::from_utf8_lossy(bytes).to_string(), // ISO-8859-1, approximated as UTF-8
        3 => String::from_utf8_lossy(bytes).to_string(), // UTF-8
        _ => String::from_utf8_lossy(bytes).to_string(), // UTF-16 variants approximated
    }
}

/// Scans for the first valid MPEG audio frame sync word after `from` and
/// returns `(bitrate_kbps, sample_rate_hz, channels)`.
fn find_frame_header(bytes: &[u8], from: usize) -> Option<(u32, u32, u8)> {
    let mut i = from;
    while i + 4 <= bytes.len() {
        if bytes[i] == 0xFF && (bytes[i + 1] & 0xE0) == 0xE0 {
            let b1 = bytes[i + 1];
            let b2 = bytes[i + 2];
            let b3 = bytes[i + 3];

            let version_bits = (b1 >> 3) & 0x03;
            let layer_bits = (b1 >> 1) & 0x03;
            if version_bits != 0b11 || layer_bits != 0b01 {
                // Only MPEG1 Layer III is decoded; skip anything else.
                i += 1;
                continue;
            }

            let bitrate_index = ((b2 >> 4) & 0x0F) as usize;
            let sample_rate_index = ((b2 >> 2) & 0x03) as usize;
            let channel_mode = (b3 >> 6) & 0x03;

            let bitrate = MPEG1_LAYER3_BITRATES_KBPS[bitrate_index];
            let sample_rate = MPEG1_SAMPLE_RATES[sample_rate_index];
            if bitrate == 0 || sample_rate == 0 {
                i += 1;
                continue;
            }

            let channels = if channel_mode == 0b11 { 1 } else { 2 };
            return Some((bitrate, sample_rate, channels));
        }
        i += 1;
    }
    None
}

pub fn parse(path: &Path, bytes: &[u8]) -> Result<Metadata, ParseError> {
    let mut metadata = Metadata::new(path.to_path_buf());
    metadata.container_format = Some("MP3".to_string());
    metadata.file_size = bytes.len() as u64;

    let tag = parse_id3v2(bytes);
    let audio_start = tag.as_ref().map(|t| t.size).unwrap_or(0);

    if let Some(tag) = &tag {
        metadata.title = tag.fields.get("TIT2").cloned();
        metadata.artist = tag.fields.get("TPE1").cloned();
        metadata.album = tag.fields.get("TALB").cloned();
        metadata.genre = tag.fields.get("TCON").cloned();
        metadata.year = tag.fields.get("TYER").or_else(|| tag.fields.get("TDRC")).cloned();
        metadata.composer = tag.fields.get("TCOM").cloned();
        metadata.comment = tag.fields.get("COMM").cloned();
        metadata.narrator = tag.fields.get("TXXX:narrator").cloned();
        metadata.publisher = tag.fields.get("TPUB").cloned();

        if let Some(track) = tag.fields.get("TRCK") {
            let (num, total) = split_slash_pair(track);
            metadata.track_number = num;
            metadata.track_total = total;
        }
        if let Some(disc) = tag.fields.get("TPOS") {
            let (num, total) = split_slash_pair(disc);
            metadata.disc_number = num;
            metadata.disc_total = total;
        }
    }

    const NOMINAL_BITRATE_KBPS: u32 = 128;

    match find_frame_header(bytes, audio_start) {
        Some((bitrate_kbps, sample_rate, channels)) => {
            metadata.bitrate = Some(bitrate_kbps);
            metadata.sample_rate = Some(sample_rate);
            metadata.channels = Some(channels);
            let audio_bytes = bytes.len().saturating_sub(audio_start) as f64;
            let bitrate_bps = bitrate_kbps as f64 * 1000.0;
            if bitrate_bps > 0.0 {
                metadata.duration = Duration::from_secs_f64(audio_bytes * 8.0 / bitrate_bps);
            }
        }
        None if tag.is_some() => {
            // A recognizable ID3v2 tag but no decodable MPEG frame: still a
            // legitimate mp3 as far as tags go, just missing technical
            // info. Estimate duration from file size and a nominal
            // bitrate rather than failing the whole file.
            let audio_bytes = bytes.len().saturating_sub(audio_start) as f64;
            metadata.bitrate = Some(NOMINAL_BITRATE_KBPS);
            metadata.duration =
                Duration::from_secs_f64(audio_bytes * 8.0 / (NOMINAL_BITRATE_KBPS as f64 * 1000.0));
            metadata
                .warnings
                .push("no MPEG frame header found; duration estimated from nominal bitrate".to_string());
        }
        None => {
            return Err(ParseError::corrupted(
                0,
                "no ID3v2 tag and no recognizable MPEG frame header",
            ));
        }
    }

    Ok(metadata)
}

fn split_slash_pair(value: &str) -> (Option<u32>, Option<u32>) {
    let mut parts = value.splitn(2, '/');
    let num = parts.next().and_then(|s| s.trim().parse().ok());
    let total = parts.next().and_then(|s| s.trim().parse().ok());
    (num, total)
}
