use byteorder::{BigEndian, ByteOrder};

use crate::ply::{FieldMask, FormatError, RecordLayout};

type Result<T> = std::result::Result<T, FormatError>;

/// Literal opening the trailer of an encrypted frame.
pub const TRAILER_MARKER: &[u8] = b"comment encrypted";

/// Trailer fields, borrowed from the container bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trailer<'a> {
    /// Plaintext sidecar length as recorded by the encoder. Not used for decoding.
    pub file_len: u32,
    pub sidecar_cipher: &'a [u8],
    pub capsule: &'a [u8],
}

/// An encrypted frame split into its reduced stream and trailer.
#[derive(Debug, Clone)]
pub struct Container<'a> {
    pub layout: RecordLayout,
    /// Header and reduced records, without the trailer.
    pub reduced: &'a [u8],
    pub trailer: Trailer<'a>,
}

impl<'a> Container<'a> {
    /// Locates the trailer right after the declared records. The marker must match exactly.
    pub fn parse(data: &'a [u8], mask: FieldMask) -> Result<Self> {
        let layout = RecordLayout::parse(data, mask)?;
        let offset = layout
            .header_len()
            .checked_add(layout.reduced_body_len())
            .ok_or(FormatError::MissingMarker { offset: usize::MAX })?;

        let mut rest = match data.get(offset..) {
            Some(rest) if rest.starts_with(TRAILER_MARKER) => &rest[TRAILER_MARKER.len()..],
            _ => return Err(FormatError::MissingMarker { offset }),
        };
        let file_len = read_u32(&mut rest, "file length")?;
        let sidecar_len = read_u32(&mut rest, "sidecar length")? as usize;
        let sidecar_cipher = take(&mut rest, sidecar_len, "sidecar ciphertext")?;
        let capsule_len = read_u32(&mut rest, "capsule length")? as usize;
        let capsule = take(&mut rest, capsule_len, "key capsule")?;

        Ok(Container {
            layout,
            reduced: &data[..offset],
            trailer: Trailer {
                file_len,
                sidecar_cipher,
                capsule,
            },
        })
    }
}

/// Appends a trailer to a reduced stream.
pub fn write_trailer(out: &mut Vec<u8>, file_len: u32, sidecar_cipher: &[u8], capsule: &[u8]) -> Result<()> {
    let sidecar_len = u32::try_from(sidecar_cipher.len())
        .map_err(|_| FormatError::OversizedSidecar(sidecar_cipher.len()))?;
    let capsule_len = u32::try_from(capsule.len())
        .map_err(|_| FormatError::TruncatedTrailer("key capsule"))?;

    out.reserve(TRAILER_MARKER.len() + 12 + sidecar_cipher.len() + capsule.len());
    out.extend_from_slice(TRAILER_MARKER);
    out.extend_from_slice(&file_len.to_be_bytes());
    out.extend_from_slice(&sidecar_len.to_be_bytes());
    out.extend_from_slice(sidecar_cipher);
    out.extend_from_slice(&capsule_len.to_be_bytes());
    out.extend_from_slice(capsule);
    Ok(())
}

fn take<'a>(rest: &mut &'a [u8], len: usize, what: &'static str) -> Result<&'a [u8]> {
    if rest.len() < len {
        return Err(FormatError::TruncatedTrailer(what));
    }
    let (head, tail) = rest.split_at(len);
    *rest = tail;
    Ok(head)
}

fn read_u32(rest: &mut &[u8], what: &'static str) -> Result<u32> {
    take(rest, 4, what).map(BigEndian::read_u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ply::fixtures;

    fn container_bytes() -> Vec<u8> {
        // reduced stream of two records with x stripped (11 bytes each)
        let mut data = fixtures::xyz_rgb_header(2).into_bytes();
        data.extend_from_slice(&[0xab; 22]);
        write_trailer(&mut data, 8, &[1; 16], &[2, 3, 4]).unwrap();
        data
    }

    #[test]
    fn parse_trailer_by_offset() {
        let data = container_bytes();
        let container = Container::parse(&data, "x".parse().unwrap()).unwrap();
        assert_eq!(container.reduced.len(), fixtures::xyz_rgb_header(2).len() + 22);
        assert_eq!(container.trailer.file_len, 8);
        assert_eq!(container.trailer.sidecar_cipher, &[1; 16]);
        assert_eq!(container.trailer.capsule, &[2, 3, 4]);
    }

    #[test]
    fn marker_must_match_exactly() {
        let mut data = container_bytes();
        let offset = fixtures::xyz_rgb_header(2).len() + 22;
        data[offset + 3] ^= 0x20;
        match Container::parse(&data, "x".parse().unwrap()) {
            Err(FormatError::MissingMarker { offset: at }) => assert_eq!(at, offset),
            other => panic!("expected missing marker, got {other:?}"),
        }
    }

    #[test]
    fn wrong_mask_misses_the_trailer() {
        let data = container_bytes();
        assert!(matches!(
            Container::parse(&data, "xy".parse().unwrap()),
            Err(FormatError::MissingMarker { .. })
        ));
    }

    #[test]
    fn truncated_trailer() {
        let data = container_bytes();
        for cut in [1, 4, 10] {
            let result = Container::parse(&data[..data.len() - cut], "x".parse().unwrap());
            assert!(matches!(result, Err(FormatError::TruncatedTrailer(_))), "cut {cut}");
        }
    }

    #[test]
    fn oversized_record_count_is_an_error() {
        let header = format!(
            "ply\nformat binary_little_endian 1.0\nelement vertex {}\n\
             property float a\nproperty float b\nproperty float c\n\
             property uchar red\nproperty uchar green\nproperty uchar blue\nend_header\n",
            usize::MAX / 15
        );
        let mut data = header.into_bytes();
        data.extend_from_slice(TRAILER_MARKER);
        assert!(Container::parse(&data, "x".parse().unwrap()).is_err());
    }
}
