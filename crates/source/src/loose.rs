use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tilestream_common::TileCoord;
use tilestream_kernel::{LoadError, TileData, TileSource};

use crate::codec;
use crate::layout::loose_tile_path;

/// Reads `DIR-xxzz/TILE-xxzz.hmap` files under a map root.
#[derive(Debug, Clone)]
pub struct LooseTileSource {
    root: PathBuf,
}

impl LooseTileSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl TileSource for LooseTileSource {
    fn load(&mut self, coord: TileCoord) -> Result<TileData, LoadError> {
        let path = loose_tile_path(&self.root, coord);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(LoadError::NotFound(coord)),
            Err(e) => return Err(e.into()),
        };
        tracing::trace!(path = %path.display(), "tile file read");
        codec::decode(&bytes)
    }

    fn describe(&self) -> String {
        format!("loose tiles at {}", self.root.display())
    }
}

/// Write one tile in the loose layout, creating its block directory.
pub fn write_loose_tile(root: &Path, coord: TileCoord, data: &TileData) -> Result<PathBuf, LoadError> {
    let path = loose_tile_path(root, coord);
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    fs::write(&path, codec::encode(data)?)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_written_tiles() {
        let dir = tempfile::tempdir().unwrap();
        let data = TileData {
            heights: vec![1.0; 257 * 257],
            material: Some("snow".into()),
        };
        let path = write_loose_tile(dir.path(), TileCoord::new(65, 2), &data).unwrap();
        assert!(path.ends_with("DIR-0100/TILE-0102.hmap"));

        let mut source = LooseTileSource::new(dir.path());
        assert_eq!(source.load(TileCoord::new(65, 2)).unwrap(), data);
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = LooseTileSource::new(dir.path());
        assert!(matches!(
            source.load(TileCoord::new(3, 3)),
            Err(LoadError::NotFound(c)) if c == TileCoord::new(3, 3)
        ));
    }

    #[test]
    fn corrupt_file_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = loose_tile_path(dir.path(), TileCoord::new(0, 0));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"not a tile").unwrap();
        let mut source = LooseTileSource::new(dir.path());
        assert!(matches!(source.load(TileCoord::new(0, 0)), Err(LoadError::Malformed(_))));
    }
}
