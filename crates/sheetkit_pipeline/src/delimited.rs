//! CSV reading and writing with configurable input encoding.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use encoding_rs::{CoderResult, Decoder, Encoding, UTF_8};
use sheetkit_log::{sheet_debug, sheet_warn};

use crate::conf::SpecPipelineConfig;
use crate::spec::PipelineError;

const V_BOM_UTF8: &[u8] = b"\xEF\xBB\xBF";

////////////////////////////////////////////////////////////////////////////////
// #region Decoding

/// Resolve an `encoding_rs` label; unknown labels fall back to UTF-8.
pub fn resolve_encoding(label: &str) -> &'static Encoding {
    match Encoding::for_label(label.trim().as_bytes()) {
        Some(encoding) => encoding,
        None => {
            sheet_warn!("Unknown encoding label {label:?}; using UTF-8");
            UTF_8
        }
    }
}

/// Decode a whole buffer lossily.
///
/// With `if_bom_sniff` a BOM picks the encoding; otherwise only a BOM of
/// `encoding` itself is removed.
pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding, if_bom_sniff: bool) -> String {
    let (text, if_had_errors) = if if_bom_sniff {
        let (text, _, if_had_errors) = encoding.decode(bytes);
        (text, if_had_errors)
    } else {
        encoding.decode_with_bom_removal(bytes)
    };
    if if_had_errors {
        sheet_debug!(
            "Malformed {} sequences replaced while decoding",
            encoding.name()
        );
    }
    text.into_owned()
}

/// `Read` adapter transcoding any `encoding_rs` encoding to UTF-8 on the fly.
pub struct DecodingReader<R> {
    inner: R,
    decoder: Decoder,
    v_buf_in: Vec<u8>,
    n_in_start: usize,
    n_in_end: usize,
    v_buf_out: Vec<u8>,
    n_out_start: usize,
    n_out_end: usize,
    if_eof: bool,
    if_finished: bool,
}

impl<R: Read> DecodingReader<R> {
    /// Wrap `inner`; see [`decode_bytes`] for BOM handling.
    pub fn new(inner: R, encoding: &'static Encoding, if_bom_sniff: bool, n_bytes_buffer: usize) -> Self {
        let decoder = if if_bom_sniff {
            encoding.new_decoder()
        } else {
            encoding.new_decoder_with_bom_removal()
        };
        let n_bytes_buffer = n_bytes_buffer.max(64);
        Self {
            inner,
            decoder,
            v_buf_in: vec![0; n_bytes_buffer],
            n_in_start: 0,
            n_in_end: 0,
            v_buf_out: vec![0; n_bytes_buffer * 3 + 16],
            n_out_start: 0,
            n_out_end: 0,
            if_eof: false,
            if_finished: false,
        }
    }
}

impl<R: Read> Read for DecodingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.n_out_start < self.n_out_end {
                let n_copy = usize::min(buf.len(), self.n_out_end - self.n_out_start);
                buf[..n_copy]
                    .copy_from_slice(&self.v_buf_out[self.n_out_start..self.n_out_start + n_copy]);
                self.n_out_start += n_copy;
                return Ok(n_copy);
            }
            if self.if_finished || buf.is_empty() {
                return Ok(0);
            }
            if self.n_in_start == self.n_in_end && !self.if_eof {
                let n_read = self.inner.read(&mut self.v_buf_in)?;
                self.n_in_start = 0;
                self.n_in_end = n_read;
                self.if_eof = n_read == 0;
            }

            let (result, n_read, n_written, _) = self.decoder.decode_to_utf8(
                &self.v_buf_in[self.n_in_start..self.n_in_end],
                &mut self.v_buf_out,
                self.if_eof,
            );
            self.n_in_start += n_read;
            self.n_out_start = 0;
            self.n_out_end = n_written;
            if self.if_eof && result == CoderResult::InputEmpty {
                self.if_finished = true;
            }
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region CsvSource

/// Input options for CSV sources.
#[derive(Debug, Clone, Copy)]
pub struct SpecCsvReadOptions {
    /// Input encoding.
    pub encoding: &'static Encoding,
    /// Let a BOM pick the encoding.
    pub if_bom_sniff: bool,
    /// Read buffer size in bytes.
    pub n_bytes_buffer: usize,
}

impl SpecCsvReadOptions {
    /// Options from configuration.
    pub fn from_config(config: &SpecPipelineConfig) -> Self {
        Self {
            encoding: resolve_encoding(&config.csv_encoding),
            if_bom_sniff: config.if_csv_bom,
            n_bytes_buffer: config.n_bytes_buffer_read(),
        }
    }
}

impl Default for SpecCsvReadOptions {
    fn default() -> Self {
        Self {
            encoding: UTF_8,
            if_bom_sniff: true,
            n_bytes_buffer: 64 * 1024,
        }
    }
}

type TypeCsvReader = csv::Reader<DecodingReader<BufReader<File>>>;

fn open_csv_reader(path: &Path, options: &SpecCsvReadOptions) -> Result<TypeCsvReader, PipelineError> {
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let reader = DecodingReader::new(
        BufReader::with_capacity(options.n_bytes_buffer, file),
        options.encoding,
        options.if_bom_sniff,
        options.n_bytes_buffer,
    );
    Ok(csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader))
}

/// Count CSV records (quote-aware, so embedded newlines do not count).
pub fn count_csv_records(path: &Path, options: &SpecCsvReadOptions) -> Result<usize, PipelineError> {
    let mut reader = open_csv_reader(path, options)?;
    let mut record = csv::ByteRecord::new();
    let mut cnt_records = 0usize;
    while reader
        .read_byte_record(&mut record)
        .map_err(|e| PipelineError::csv(path, e))?
    {
        cnt_records += 1;
    }
    Ok(cnt_records)
}

/// Streaming CSV row reader.
pub struct CsvRowSource {
    path: PathBuf,
    reader: TypeCsvReader,
    record: csv::StringRecord,
    n_rows_total: usize,
}

impl CsvRowSource {
    /// Count records (first pass), then open for streaming (second pass).
    pub fn open(path: &Path, options: &SpecCsvReadOptions) -> Result<Self, PipelineError> {
        let n_rows_total = count_csv_records(path, options)?;
        Ok(Self {
            path: path.to_path_buf(),
            reader: open_csv_reader(path, options)?,
            record: csv::StringRecord::new(),
            n_rows_total,
        })
    }

    /// Record count from the first pass.
    pub fn n_rows_total(&self) -> usize {
        self.n_rows_total
    }

    /// Next record, or `None` at end of input.
    pub fn next_row(&mut self) -> Result<Option<Vec<String>>, PipelineError> {
        let if_has_record = self
            .reader
            .read_record(&mut self.record)
            .map_err(|e| PipelineError::csv(&self.path, e))?;
        if !if_has_record {
            return Ok(None);
        }
        Ok(Some(self.record.iter().map(str::to_string).collect()))
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region CsvSink

/// Output options for CSV sinks. Output is always UTF-8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecCsvWriteOptions {
    /// Prefix the file with a UTF-8 BOM.
    pub if_bom: bool,
    /// Write buffer size in bytes.
    pub n_bytes_buffer: usize,
}

impl SpecCsvWriteOptions {
    /// Options from configuration.
    pub fn from_config(config: &SpecPipelineConfig) -> Self {
        Self {
            if_bom: config.if_csv_bom,
            n_bytes_buffer: config.n_bytes_buffer_write(),
        }
    }
}

impl Default for SpecCsvWriteOptions {
    fn default() -> Self {
        Self {
            if_bom: false,
            n_bytes_buffer: 64 * 1024,
        }
    }
}

/// Sequential CSV sink. Rows must arrive in order; gaps are filled with empty records.
pub struct CsvRowSink {
    path_file_out: PathBuf,
    writer: Option<csv::Writer<BufWriter<File>>>,
    n_rows_written: usize,
    segment: Option<(usize, u64)>,
}

impl CsvRowSink {
    /// Create or truncate `path_file_out`.
    pub fn create(path_file_out: PathBuf, options: &SpecCsvWriteOptions) -> Result<Self, PipelineError> {
        let file = File::create(&path_file_out).map_err(|e| PipelineError::io(&path_file_out, e))?;
        let mut buf_writer = BufWriter::with_capacity(options.n_bytes_buffer, file);
        if options.if_bom {
            buf_writer
                .write_all(V_BOM_UTF8)
                .map_err(|e| PipelineError::io(&path_file_out, e))?;
        }
        let writer = csv::WriterBuilder::new()
            .flexible(true)
            .from_writer(buf_writer);
        Ok(Self {
            path_file_out,
            writer: Some(writer),
            n_rows_written: 0,
            segment: None,
        })
    }

    /// Rows written so far.
    pub fn n_rows_written(&self) -> usize {
        self.n_rows_written
    }

    fn writer_mut(&mut self) -> Result<&mut csv::Writer<BufWriter<File>>, PipelineError> {
        self.writer
            .as_mut()
            .ok_or_else(|| PipelineError::Validation("CSV sink already closed".to_string()))
    }

    fn flush_and_locate(&mut self) -> Result<u64, PipelineError> {
        let path_file_out = self.path_file_out.clone();
        let writer = self.writer_mut()?;
        writer
            .flush()
            .map_err(|e| PipelineError::io(&path_file_out, e))?;
        let mut file: &File = writer.get_ref().get_ref();
        file.stream_position()
            .map_err(|e| PipelineError::io(&path_file_out, e))
    }
}

impl crate::sink::RowSink for CsvRowSink {
    fn file_out(&self) -> &Path {
        &self.path_file_out
    }

    fn write_row(&mut self, n_row: usize, row: &[String]) -> Result<(), PipelineError> {
        if n_row < self.n_rows_written {
            return Err(PipelineError::Validation(format!(
                "CSV rows must be written in order: row {n_row} after {} rows",
                self.n_rows_written
            )));
        }
        let path_file_out = self.path_file_out.clone();
        let n_rows_gap = n_row - self.n_rows_written;
        let writer = self.writer_mut()?;
        for _ in 0..n_rows_gap {
            writer
                .write_record([""])
                .map_err(|e| PipelineError::csv(&path_file_out, e))?;
        }
        writer
            .write_record(row)
            .map_err(|e| PipelineError::csv(&path_file_out, e))?;
        self.n_rows_written = n_row + 1;
        Ok(())
    }

    fn begin_segment(&mut self, n_row_start: usize) -> Result<(), PipelineError> {
        let n_offset = self.flush_and_locate()?;
        self.segment = Some((self.n_rows_written.min(n_row_start), n_offset));
        Ok(())
    }

    fn commit_segment(&mut self) {
        self.segment = None;
    }

    fn discard_segment(&mut self) -> Result<usize, PipelineError> {
        let Some((n_row_start, n_offset)) = self.segment.take() else {
            return Ok(0);
        };
        self.flush_and_locate()?;
        let path_file_out = self.path_file_out.clone();
        // Buffers are empty after the flush, so the file handle can be moved directly.
        let mut file: &File = self.writer_mut()?.get_ref().get_ref();
        file.set_len(n_offset)
            .and_then(|_| file.seek(SeekFrom::Start(n_offset)))
            .map_err(|e| PipelineError::io(&path_file_out, e))?;

        let n_rows_dropped = self.n_rows_written.saturating_sub(n_row_start);
        self.n_rows_written = n_row_start;
        Ok(n_rows_dropped)
    }

    fn close(&mut self) -> Result<PathBuf, PipelineError> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .flush()
                .map_err(|e| PipelineError::io(&self.path_file_out, e))?;
        }
        Ok(self.path_file_out.clone())
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::RowSink;

    fn row(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn read_all(path: &Path, options: &SpecCsvReadOptions) -> Vec<Vec<String>> {
        let mut source = CsvRowSource::open(path, options).expect("open");
        let mut l_rows = Vec::new();
        while let Some(row) = source.next_row().expect("row") {
            l_rows.push(row);
        }
        assert_eq!(l_rows.len(), source.n_rows_total());
        l_rows
    }

    #[test]
    fn csv_round_trip_preserves_quotes_commas_and_newlines() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path_csv = tmp.path().join("tricky.csv");
        let l_rows = vec![
            row(&["name", "note"]),
            row(&["a,b", "say \"hi\""]),
            row(&["multi\nline", ""]),
            row(&["ragged"]),
        ];

        let mut sink = CsvRowSink::create(
            path_csv.clone(),
            &SpecCsvWriteOptions {
                if_bom: true,
                ..SpecCsvWriteOptions::default()
            },
        )
        .expect("sink");
        for (n_idx, row) in l_rows.iter().enumerate() {
            sink.write_row(n_idx, row).expect("write");
        }
        sink.close().expect("close");
        assert!(std::fs::read(&path_csv).expect("read").starts_with(V_BOM_UTF8));

        assert_eq!(read_all(&path_csv, &SpecCsvReadOptions::default()), l_rows);
    }

    #[test]
    fn csv_source_decodes_configured_encoding() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path_csv = tmp.path().join("gbk.csv");
        let (v_bytes, _, _) = encoding_rs::GBK.encode("城市,人口\n北京,2189\n");
        std::fs::write(&path_csv, &v_bytes).expect("write");

        let options = SpecCsvReadOptions {
            encoding: resolve_encoding("gbk"),
            n_bytes_buffer: 64,
            ..SpecCsvReadOptions::default()
        };
        assert_eq!(
            read_all(&path_csv, &options),
            vec![row(&["城市", "人口"]), row(&["北京", "2189"])]
        );
        assert_eq!(resolve_encoding("no-such-label"), UTF_8);
    }

    #[test]
    fn decoding_reader_handles_tiny_reads() {
        let mut reader = DecodingReader::new(
            "\u{FEFF}héllo wörld".as_bytes(),
            UTF_8,
            true,
            1,
        );
        let mut v_out = Vec::new();
        let mut buf = [0u8; 3];
        loop {
            let n_read = reader.read(&mut buf).expect("read");
            if n_read == 0 {
                break;
            }
            v_out.extend_from_slice(&buf[..n_read]);
        }
        assert_eq!(String::from_utf8(v_out).expect("utf-8"), "héllo wörld");

        let mut reader = DecodingReader::new("\u{FEFF}héllo".as_bytes(), UTF_8, true, 1);
        let mut text = String::new();
        reader.read_to_string(&mut text).expect("read_to_string");
        assert_eq!(text, "héllo");
    }

    #[test]
    fn csv_sink_discard_segment_truncates_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path_csv = tmp.path().join("seg.csv");
        let mut sink =
            CsvRowSink::create(path_csv.clone(), &SpecCsvWriteOptions::default()).expect("sink");
        sink.write_row(0, &row(&["keep"])).expect("write");
        sink.begin_segment(1).expect("begin");
        sink.write_row(1, &row(&["drop"])).expect("write");
        sink.write_row(2, &row(&["drop"])).expect("write");
        assert_eq!(sink.discard_segment().expect("discard"), 2);
        assert_eq!(sink.n_rows_written(), 1);
        sink.write_row(1, &row(&["after"])).expect("write");
        assert!(sink.write_row(0, &row(&["late"])).is_err());
        sink.close().expect("close");

        assert_eq!(
            std::fs::read_to_string(&path_csv).expect("read"),
            "keep\nafter\n"
        );
    }

    #[test]
    fn csv_sink_discard_from_first_row_keeps_bom_and_reopens_segment() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path_csv = tmp.path().join("bom_seg.csv");
        let mut sink = CsvRowSink::create(
            path_csv.clone(),
            &SpecCsvWriteOptions {
                if_bom: true,
                n_bytes_buffer: 8,
            },
        )
        .expect("sink");
        sink.begin_segment(0).expect("begin");
        for n_row in 0..50 {
            sink.write_row(n_row, &row(&["a long enough value", "x"]))
                .expect("write");
        }
        assert_eq!(sink.discard_segment().expect("discard"), 50);
        assert_eq!(std::fs::read(&path_csv).expect("read"), V_BOM_UTF8);

        sink.begin_segment(0).expect("begin again");
        sink.write_row(0, &row(&["h"])).expect("write");
        sink.commit_segment();
        assert_eq!(sink.discard_segment().expect("nothing open"), 0);
        sink.close().expect("close");

        let v_bytes = std::fs::read(&path_csv).expect("read");
        assert_eq!(&v_bytes[..3], V_BOM_UTF8);
        assert_eq!(&v_bytes[3..], b"h\n");
    }

    #[test]
    fn decode_bytes_strips_bom_and_replaces_garbage() {
        assert_eq!(decode_bytes(b"\xEF\xBB\xBFabc", UTF_8, true), "abc");
        assert_eq!(decode_bytes(b"\xEF\xBB\xBFabc", UTF_8, false), "abc");
        assert_eq!(decode_bytes(b"a\xFFb", UTF_8, true), "a\u{FFFD}b");
    }
}
