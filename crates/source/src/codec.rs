//! `.hmap` heightmap tile files.
//!
//! ```text
//! "HMAP"              magic
//! u32 LE              vertices per side
//! side*side f32 LE    heights, row-major (row = z)
//! [UTF-8 bytes]       optional material name, to end of file
//! ```

use std::io::{Read, Write};

use tilestream_kernel::{LoadError, TileData};

pub const HMAP_MAGIC: &[u8; 4] = b"HMAP";

const HEADER_LEN: usize = 8;

/// Serialize a tile. Fails if the heights do not form a square.
pub fn encode(data: &TileData) -> Result<Vec<u8>, LoadError> {
    let side = square_side(data.heights.len())
        .ok_or_else(|| LoadError::Malformed(format!("{} heights is not a square grid", data.heights.len())))?;
    let material = data.material.as_deref().unwrap_or("");
    let mut out = Vec::with_capacity(HEADER_LEN + data.heights.len() * 4 + material.len());
    out.extend_from_slice(HMAP_MAGIC);
    out.extend_from_slice(&side.to_le_bytes());
    for h in &data.heights {
        out.extend_from_slice(&h.to_le_bytes());
    }
    out.extend_from_slice(material.as_bytes());
    Ok(out)
}

pub fn decode(bytes: &[u8]) -> Result<TileData, LoadError> {
    if bytes.len() < HEADER_LEN || &bytes[..4] != HMAP_MAGIC {
        return Err(LoadError::Malformed("missing HMAP header".into()));
    }
    let side = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    let count = side
        .checked_mul(side)
        .ok_or_else(|| LoadError::Malformed(format!("side {side} too large")))?;
    let body_end = count
        .checked_mul(4)
        .and_then(|n| n.checked_add(HEADER_LEN))
        .filter(|end| *end <= bytes.len())
        .ok_or_else(|| LoadError::Malformed(format!("truncated: {side}x{side} heights expected")))?;

    let heights = bytes[HEADER_LEN..body_end]
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    let material = match &bytes[body_end..] {
        [] => None,
        tail => Some(
            std::str::from_utf8(tail)
                .map_err(|e| LoadError::Malformed(format!("material name: {e}")))?
                .to_string(),
        ),
    };
    Ok(TileData { heights, material })
}

pub fn write_to(mut writer: impl Write, data: &TileData) -> Result<(), LoadError> {
    writer.write_all(&encode(data)?)?;
    Ok(())
}

pub fn read_from(mut reader: impl Read) -> Result<TileData, LoadError> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    decode(&bytes)
}

fn square_side(len: usize) -> Option<u32> {
    let side = (len as f64).sqrt().round() as usize;
    (side > 0 && side * side == len).then(|| u32::try_from(side).ok()).flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TileData {
        TileData {
            heights: (0..9).map(|i| i as f32 * 0.5).collect(),
            material: Some("rock/granite".into()),
        }
    }

    #[test]
    fn decode_reads_back_heights_and_material() {
        let bytes = encode(&sample()).unwrap();
        assert_eq!(&bytes[..4], b"HMAP");
        assert_eq!(u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]), 3);
        assert_eq!(decode(&bytes).unwrap(), sample());
    }

    #[test]
    fn material_is_optional() {
        let data = TileData::flat(4);
        let decoded = decode(&encode(&data).unwrap()).unwrap();
        assert_eq!(decoded.material, None);
        assert_eq!(decoded.heights.len(), 25);
    }

    #[test]
    fn bad_magic_and_truncation_rejected() {
        let mut bytes = encode(&sample()).unwrap();
        assert!(matches!(decode(&bytes[..20]), Err(LoadError::Malformed(_))));
        bytes[0] = b'X';
        assert!(matches!(decode(&bytes), Err(LoadError::Malformed(_))));
        assert!(matches!(decode(b"HMA"), Err(LoadError::Malformed(_))));
    }

    #[test]
    fn non_square_heights_refused() {
        let data = TileData {
            heights: vec![0.0; 10],
            material: None,
        };
        assert!(encode(&data).is_err());
    }
}
