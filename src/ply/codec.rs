use std::io::Write;

use byteorder::{BigEndian, ByteOrder};
use log::warn;

use super::layout::{FormatError, RecordLayout};
use super::FieldMask;

type Result<T> = std::result::Result<T, FormatError>;

/// Records reconstructed per batch unless configured otherwise.
pub const DEFAULT_BATCH_RECORDS: usize = 4096;

/// Size of the big-endian length prefix at the start of a sidecar.
pub const SIDECAR_PREFIX_LEN: usize = 4;

/// Which buffer a run of bytes lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunSource {
    Reduced,
    Sidecar,
}

/// A maximal span of adjacent fields that share a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyRun {
    pub source: RunSource,
    pub len: usize,
    /// Offset of the run inside a full record.
    pub full_offset: usize,
    /// Offset of the run inside a reduced record. Only meaningful for `RunSource::Reduced`.
    pub reduced_offset: usize,
    /// Offset of the run inside one record's stripped bytes. Only meaningful for `RunSource::Sidecar`.
    pub sidecar_offset: usize,
}

/// Immutable list of copy runs, built once per layout and replayed for every record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyPlan {
    runs: Vec<CopyRun>,
}

impl CopyPlan {
    pub fn new(layout: &RecordLayout) -> Self {
        let mut runs: Vec<CopyRun> = Vec::new();
        let (mut full_offset, mut reduced_offset, mut sidecar_offset) = (0, 0, 0);

        for field in layout.fields() {
            let source = if field.stripped {
                RunSource::Sidecar
            } else {
                RunSource::Reduced
            };
            match runs.last_mut() {
                Some(run) if run.source == source => run.len += field.size,
                _ => runs.push(CopyRun {
                    source,
                    len: field.size,
                    full_offset,
                    reduced_offset,
                    sidecar_offset,
                }),
            }
            full_offset += field.size;
            match source {
                RunSource::Reduced => reduced_offset += field.size,
                RunSource::Sidecar => sidecar_offset += field.size,
            }
        }

        CopyPlan { runs }
    }

    pub fn runs(&self) -> &[CopyRun] {
        &self.runs
    }
}

/// Full frame split into its reduced stream and the sidecar of stripped values.
#[derive(Debug, Clone)]
pub struct StrippedFrame {
    pub layout: RecordLayout,
    pub reduced: Vec<u8>,
    pub sidecar: Vec<u8>,
}

/// Converts between full records and reduced records plus sidecar.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    batch_records: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        FrameCodec {
            batch_records: DEFAULT_BATCH_RECORDS,
        }
    }
}

impl FrameCodec {
    pub fn with_batch_records(batch_records: usize) -> Self {
        FrameCodec {
            batch_records: batch_records.max(1),
        }
    }

    pub fn batch_records(&self) -> usize {
        self.batch_records
    }

    /// Removes the masked fields from every record of `full`.
    ///
    /// The header is carried over verbatim. `full` must hold exactly the records its header declares.
    pub fn strip_fields(&self, full: &[u8], mask: FieldMask) -> Result<StrippedFrame> {
        let layout = RecordLayout::parse(full, mask)?;
        let header_len = layout.header_len();
        let body = &full[header_len..];
        let needed = layout.full_body_len();
        if body.len() < needed {
            return Err(FormatError::ShortRecords {
                record: (body.len() / layout.full_record_size()) as u64,
                needed,
                available: body.len(),
            });
        }
        if body.len() > needed {
            return Err(FormatError::TrailingData(body.len() - needed));
        }

        let sidecar_len = layout.sidecar_body_len();
        let declared =
            u32::try_from(sidecar_len).map_err(|_| FormatError::OversizedSidecar(sidecar_len))?;

        let mut reduced = Vec::with_capacity(header_len + layout.reduced_body_len());
        reduced.extend_from_slice(&full[..header_len]);
        let mut sidecar = Vec::with_capacity(SIDECAR_PREFIX_LEN + sidecar_len);
        sidecar.extend_from_slice(&declared.to_be_bytes());

        let plan = CopyPlan::new(&layout);
        for record in body.chunks_exact(layout.full_record_size()) {
            for run in plan.runs() {
                let bytes = &record[run.full_offset..run.full_offset + run.len];
                match run.source {
                    RunSource::Reduced => reduced.extend_from_slice(bytes),
                    RunSource::Sidecar => sidecar.extend_from_slice(bytes),
                }
            }
        }

        Ok(StrippedFrame {
            layout,
            reduced,
            sidecar,
        })
    }

    /// Restores the full frame from a reduced stream and its sidecar.
    pub fn reconstruct(&self, reduced: &[u8], sidecar: &[u8], mask: FieldMask) -> Result<Vec<u8>> {
        let layout = RecordLayout::parse(reduced, mask)?;
        self.reconstruct_with_layout(&layout, reduced, sidecar, None)
    }

    /// Restores the full frame using an already parsed layout, mirroring every batch into `sink`.
    ///
    /// A failing sink is reported and abandoned; it never fails the reconstruction. Bytes after
    /// the declared records in `reduced` are ignored.
    pub fn reconstruct_with_layout(
        &self,
        layout: &RecordLayout,
        reduced: &[u8],
        sidecar: &[u8],
        mut sink: Option<&mut dyn Write>,
    ) -> Result<Vec<u8>> {
        let full_size = layout.full_record_size();
        let reduced_size = layout.reduced_record_size();
        let stripped_size = layout.stripped_record_size();
        let records = layout.record_count() as usize;
        let header_len = layout.header_len();

        if sidecar.len() < SIDECAR_PREFIX_LEN {
            return Err(FormatError::MissingSidecarLength);
        }
        let declared = BigEndian::read_u32(&sidecar[..SIDECAR_PREFIX_LEN]) as usize;
        let expected = layout.sidecar_body_len();
        if declared != expected {
            warn!("[codec] sidecar declares {declared} bytes, layout needs {expected}");
        }
        let values = &sidecar[SIDECAR_PREFIX_LEN..];
        if values.len() < expected {
            return Err(FormatError::ShortSidecar {
                expected,
                available: values.len(),
            });
        }

        let body = &reduced[header_len..];
        if body.len() < layout.reduced_body_len() {
            return Err(FormatError::ShortRecords {
                record: (body.len() / reduced_size.max(1)) as u64,
                needed: layout.reduced_body_len(),
                available: body.len(),
            });
        }

        let plan = CopyPlan::new(layout);
        let mut out = Vec::with_capacity(header_len + layout.full_body_len());
        out.extend_from_slice(&reduced[..header_len]);
        mirror(&mut sink, &reduced[..header_len]);

        let mut batch = vec![0u8; self.batch_records.min(records) * full_size];
        let mut done = 0;
        while done < records {
            let count = (records - done).min(self.batch_records);
            let rows = &body[done * reduced_size..(done + count) * reduced_size];
            let side = &values[done * stripped_size..(done + count) * stripped_size];
            let chunk = &mut batch[..count * full_size];

            for i in 0..count {
                let out_row = &mut chunk[i * full_size..(i + 1) * full_size];
                let reduced_row = &rows[i * reduced_size..(i + 1) * reduced_size];
                let side_row = &side[i * stripped_size..(i + 1) * stripped_size];
                for run in plan.runs() {
                    let src = match run.source {
                        RunSource::Reduced => {
                            &reduced_row[run.reduced_offset..run.reduced_offset + run.len]
                        }
                        RunSource::Sidecar => {
                            &side_row[run.sidecar_offset..run.sidecar_offset + run.len]
                        }
                    };
                    out_row[run.full_offset..run.full_offset + run.len].copy_from_slice(src);
                }
            }

            out.extend_from_slice(chunk);
            mirror(&mut sink, chunk);
            done += count;
        }

        Ok(out)
    }
}

fn mirror(sink: &mut Option<&mut dyn Write>, bytes: &[u8]) {
    if let Some(writer) = sink {
        if let Err(e) = writer.write_all(bytes) {
            warn!("[codec] dropping frame output: {e}");
            *sink = None;
        }
    }
}
