//! Binary PLY frames: header layout and the field strip / reconstruct codec.

pub mod codec;
pub mod layout;

pub use codec::{CopyPlan, CopyRun, FrameCodec, RunSource, StrippedFrame, DEFAULT_BATCH_RECORDS};
pub use layout::{property_size, FieldMask, FieldSpec, FormatError, RecordLayout, END_HEADER};
