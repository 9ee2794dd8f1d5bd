use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use thiserror::Error;

type Result<T> = std::result::Result<T, FormatError>;

/// Line terminating the text header.
pub const END_HEADER: &str = "end_header";

/// Represents the ways a frame can fail to match the layout it declares.
#[derive(Error, Debug)]
pub enum FormatError {
    /// Represents an error with the header of the frame.
    #[error("Invalid header while parsing {section:?}. {error_msg:?}\n\t{actual_line:?}")]
    InvalidHeader {
        /// The portion of the header where the error is encountered
        section: String,
        /// A custom error messaging describing the error
        error_msg: String,
        /// The line which caused the error
        actual_line: String,
    },
    #[error("Unsupported property type {0:?}")]
    UnsupportedType(String),
    #[error("Header is not terminated by `{END_HEADER}`")]
    UnterminatedHeader,
    #[error("Unexpected end of records at record {record}: needed {needed} bytes, {available} available")]
    ShortRecords {
        record: u64,
        needed: usize,
        available: usize,
    },
    #[error("{0} bytes follow the vertex records")]
    TrailingData(usize),
    #[error("Sidecar is missing its length prefix")]
    MissingSidecarLength,
    #[error("Sidecar holds {available} bytes of stripped values, {expected} needed")]
    ShortSidecar { expected: usize, available: usize },
    #[error("Sidecar of {0} bytes does not fit its 32-bit length prefix")]
    OversizedSidecar(usize),
    #[error("Trailer marker not found at offset {offset}")]
    MissingMarker { offset: usize },
    #[error("Trailer truncated while reading {0}")]
    TruncatedTrailer(&'static str),
}

/// Geometry axes selected for stripping. At least one axis is set when parsed from a pattern.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FieldMask {
    pub x: bool,
    pub y: bool,
    pub z: bool,
}

impl FieldMask {
    pub fn new(x: bool, y: bool, z: bool) -> Self {
        FieldMask { x, y, z }
    }

    /// Returns true if the property with this name is stripped under the mask.
    pub fn selects(&self, name: &str) -> bool {
        match name {
            "x" => self.x,
            "y" => self.y,
            "z" => self.z,
            _ => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.x || self.y || self.z)
    }
}

impl FromStr for FieldMask {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut mask = FieldMask::default();
        for c in s.trim().chars() {
            match c {
                'x' | 'X' => mask.x = true,
                'y' | 'Y' => mask.y = true,
                'z' | 'Z' => mask.z = true,
                _ => return Err(format!("Invalid pattern {s:?} (use x|y|z|xy|xz|yz|xyz)")),
            }
        }
        if mask.is_empty() {
            return Err("Pattern must select at least one of x, y, z".to_string());
        }
        Ok(mask)
    }
}

impl Display for FieldMask {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (set, axis) in [(self.x, 'x'), (self.y, 'y'), (self.z, 'z')] {
            if set {
                write!(f, "{axis}")?;
            }
        }
        Ok(())
    }
}

/// Byte width of a scalar property type.
pub fn property_size(ty: &str) -> Result<usize> {
    match ty {
        "byte" | "char" | "uchar" | "int8" | "uint8" => Ok(1),
        "short" | "ushort" | "int16" | "uint16" => Ok(2),
        "int" | "uint" | "int32" | "uint32" | "float" | "float32" => Ok(4),
        "long" | "ulong" | "double" | "float64" => Ok(8),
        _ => Err(FormatError::UnsupportedType(ty.to_string())),
    }
}

/// One vertex property in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub size: usize,
    pub stripped: bool,
}

/// Record layout of a frame, resolved against a field mask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordLayout {
    header_len: usize,
    record_count: u64,
    fields: Vec<FieldSpec>,
    full_record_size: usize,
    reduced_record_size: usize,
}

impl RecordLayout {
    /// Parses the text header at the start of `data`.
    ///
    /// Both full and reduced frames carry the same header, so the mask decides which
    /// properties are considered absent from the records.
    pub fn parse(data: &[u8], mask: FieldMask) -> Result<Self> {
        HeaderParser::new(data).parse(mask)
    }

    /// Length of the header in bytes, including the `end_header` line terminator.
    pub fn header_len(&self) -> usize {
        self.header_len
    }

    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn full_record_size(&self) -> usize {
        self.full_record_size
    }

    pub fn reduced_record_size(&self) -> usize {
        self.reduced_record_size
    }

    pub fn stripped_record_size(&self) -> usize {
        self.full_record_size - self.reduced_record_size
    }

    /// Bytes occupied by the full records.
    pub fn full_body_len(&self) -> usize {
        self.record_count as usize * self.full_record_size
    }

    /// Bytes occupied by the reduced records.
    pub fn reduced_body_len(&self) -> usize {
        self.record_count as usize * self.reduced_record_size
    }

    /// Bytes of stripped values across all records, excluding the sidecar length prefix.
    pub fn sidecar_body_len(&self) -> usize {
        self.record_count as usize * self.stripped_record_size()
    }
}

struct HeaderParser<'a> {
    data: &'a [u8],
    pos: usize,
    line: String,
}

impl<'a> HeaderParser<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            line: String::new(),
        }
    }

    fn parse(mut self, mask: FieldMask) -> Result<RecordLayout> {
        if !self.next_line() || self.line.trim() != "ply" {
            return Err(self.header_err("ply", "Expected `ply` magic line".to_string()));
        }

        let mut record_count = None;
        let mut in_vertex = false;
        let mut other_element_seen = false;
        let mut fields = Vec::new();

        loop {
            if !self.next_line() {
                return Err(FormatError::UnterminatedHeader);
            }
            let line = self.line.trim().to_string();
            let mut tokens = line.split_whitespace();
            match tokens.next() {
                Some(END_HEADER) => break,
                Some("format") => self.check_format(tokens.next())?,
                Some("element") => {
                    let name = tokens.next();
                    let count = tokens.next();
                    if name == Some("vertex") {
                        if other_element_seen {
                            return Err(self.header_err(
                                "element",
                                "The vertex element must be declared first".to_string(),
                            ));
                        }
                        let count = count
                            .ok_or_else(|| self.header_err("element", "Missing count".to_string()))?
                            .parse::<u64>()
                            .map_err(|e| self.header_err("element", e.to_string()))?;
                        record_count = Some(count);
                        in_vertex = true;
                    } else {
                        in_vertex = false;
                        other_element_seen = true;
                    }
                }
                Some("property") if in_vertex => {
                    let ty = tokens
                        .next()
                        .ok_or_else(|| self.header_err("property", "Missing type".to_string()))?;
                    if ty == "list" {
                        return Err(self.header_err(
                            "property",
                            "List properties are not supported in the vertex element".to_string(),
                        ));
                    }
                    let name = tokens
                        .next()
                        .ok_or_else(|| self.header_err("property", "Missing name".to_string()))?;
                    fields.push(FieldSpec {
                        name: name.to_string(),
                        size: property_size(ty)?,
                        stripped: mask.selects(name),
                    });
                }
                // comments, obj_info and properties of other elements
                _ => {}
            }
        }

        let record_count = record_count
            .ok_or_else(|| self.header_err("element", "Missing vertex element".to_string()))?;
        if fields.is_empty() {
            return Err(self.header_err("property", "Vertex element has no properties".to_string()));
        }

        let full_record_size: usize = fields.iter().map(|f| f.size).sum();
        let reduced_record_size = fields.iter().filter(|f| !f.stripped).map(|f| f.size).sum();
        if record_count
            .checked_mul(full_record_size as u64)
            .and_then(|len| usize::try_from(len).ok())
            .and_then(|len| len.checked_add(self.pos))
            .is_none()
        {
            return Err(self.header_err(
                "element",
                format!("{record_count} vertices do not fit in memory"),
            ));
        }

        Ok(RecordLayout {
            header_len: self.pos,
            record_count,
            fields,
            full_record_size,
            reduced_record_size,
        })
    }

    fn check_format(&self, format: Option<&str>) -> Result<()> {
        match format {
            Some("binary_little_endian") | Some("binary_big_endian") => Ok(()),
            Some("ascii") => Err(self.header_err(
                "format",
                "ASCII records are not supported".to_string(),
            )),
            _ => Err(self.header_err("format", "Unknown format".to_string())),
        }
    }

    /// Reads the next line into `self.line`. Returns false once the data is exhausted.
    fn next_line(&mut self) -> bool {
        self.line.clear();
        if self.pos >= self.data.len() {
            return false;
        }
        let rest = &self.data[self.pos..];
        let (line, consumed) = match rest.iter().position(|&b| b == b'\n') {
            Some(end) => (&rest[..end], end + 1),
            None => (rest, rest.len()),
        };
        self.line.push_str(&String::from_utf8_lossy(line));
        self.pos += consumed;
        true
    }

    fn header_err(&self, section: &str, error_msg: String) -> FormatError {
        FormatError::InvalidHeader {
            section: section.to_string(),
            error_msg,
            actual_line: self.line.clone(),
        }
    }
}
