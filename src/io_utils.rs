//! CSV reading and writing helpers used by the file-backed store.
//!
//! Input is decoded with a configurable `encoding_rs` encoding (UTF-8 by
//! default). Output is encoded the same way and always quoted so a table written
//! by the store scans back unchanged.

use std::{
    fs::File,
    io::{BufReader, Read, Write},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use csv::QuoteStyle;
use encoding_rs::{Encoding, UTF_8};

pub const DEFAULT_DELIMITER: u8 = b',';

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

pub fn open_csv_reader(path: &Path, delimiter: u8) -> Result<csv::Reader<BufReader<File>>> {
    let file = File::open(path).with_context(|| format!("Opening table file {path:?}"))?;
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(true)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(false);
    Ok(builder.from_reader(BufReader::new(file)))
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(anyhow!(
            "Failed to decode text with encoding {}",
            encoding.name()
        ))
    } else {
        Ok(text.into_owned())
    }
}

pub fn decode_record(record: &csv::ByteRecord, encoding: &'static Encoding) -> Result<Vec<String>> {
    record
        .iter()
        .map(|field| decode_bytes(field, encoding))
        .collect()
}

pub fn reader_headers<R: Read>(
    reader: &mut csv::Reader<R>,
    encoding: &'static Encoding,
) -> Result<Vec<String>> {
    let headers = reader.byte_headers()?.clone();
    decode_record(&headers, encoding)
}

/// Serializes `headers` and `rows` to CSV text, then encodes it into `out`.
pub fn write_csv<W: Write>(
    out: &mut W,
    headers: &[String],
    rows: impl IntoIterator<Item = Vec<String>>,
    delimiter: u8,
    encoding: &'static Encoding,
) -> Result<usize> {
    let mut builder = csv::WriterBuilder::new();
    builder
        .delimiter(delimiter)
        .quote_style(QuoteStyle::Always)
        .double_quote(true);
    let mut writer = builder.from_writer(Vec::new());
    writer
        .write_record(headers)
        .context("Writing table headers")?;
    let mut count = 0usize;
    for row in rows {
        count += 1;
        writer
            .write_record(&row)
            .with_context(|| format!("Writing row {}", count + 1))?;
    }
    let buffer = writer
        .into_inner()
        .map_err(|err| anyhow!("Flushing CSV buffer: {}", err.error()))?;
    let text = String::from_utf8(buffer).context("CSV output is not valid UTF-8")?;
    if encoding == UTF_8 {
        out.write_all(text.as_bytes())?;
    } else {
        let (encoded, _, had_errors) = encoding.encode(&text);
        if had_errors {
            return Err(anyhow!("Failed to encode text using {}", encoding.name()));
        }
        out.write_all(encoded.as_ref())?;
    }
    out.flush()?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_encoding_accepts_labels() {
        assert_eq!(resolve_encoding(None).unwrap(), UTF_8);
        assert_eq!(
            resolve_encoding(Some("latin1")).unwrap().name(),
            "windows-1252"
        );
        assert!(resolve_encoding(Some("klingon")).is_err());
    }

    #[test]
    fn write_csv_quotes_and_transcodes() {
        let mut out = Vec::new();
        let headers = vec!["brand".to_string()];
        let rows = vec![vec!["CAFÉ".to_string()]];
        let windows_1252 = resolve_encoding(Some("windows-1252")).unwrap();
        let written = write_csv(&mut out, &headers, rows, b';', windows_1252).unwrap();
        assert_eq!(written, 1);
        assert_eq!(out, b"\"brand\"\n\"CAF\xC9\"\n".to_vec());
    }
}
