use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tilestream_common::TileCoord;
use tilestream_kernel::{LoadError, TileData, TileSource};

use crate::codec;
use crate::layout::{archive_name, archive_path, tile_file_name};

/// Byte range of one tile inside an archive.
#[derive(Debug, Clone, Copy)]
struct EntrySpan {
    offset: u64,
    len: u64,
}

/// Reads tiles out of per-block `DIR-xxzz.tar` archives.
///
/// Each archive is indexed on first use; later loads seek straight to the
/// entry. A missing archive means every tile in its block is missing.
#[derive(Debug)]
pub struct ArchiveTileSource {
    root: PathBuf,
    /// Archive name to entry index; `None` when the archive does not exist.
    indexes: HashMap<String, Option<HashMap<String, EntrySpan>>>,
}

impl ArchiveTileSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            indexes: HashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn span(&mut self, coord: TileCoord) -> Result<Option<EntrySpan>, LoadError> {
        let name = archive_name(coord);
        if !self.indexes.contains_key(&name) {
            let index = index_archive(&archive_path(&self.root, coord))?;
            self.indexes.insert(name.clone(), index);
        }
        Ok(self
            .indexes
            .get(&name)
            .and_then(Option::as_ref)
            .and_then(|index| index.get(&tile_file_name(coord)).copied()))
    }
}

fn index_archive(path: &Path) -> Result<Option<HashMap<String, EntrySpan>>, LoadError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::debug!(archive = %path.display(), "tile archive missing");
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };
    let mut archive = tar::Archive::new(file);
    let mut index = HashMap::new();
    for entry in archive.entries()? {
        let entry = entry?;
        let name = entry.path()?.to_string_lossy().into_owned();
        index.insert(
            name,
            EntrySpan {
                offset: entry.raw_file_position(),
                len: entry.size(),
            },
        );
    }
    tracing::debug!(archive = %path.display(), entries = index.len(), "tile archive indexed");
    Ok(Some(index))
}

impl TileSource for ArchiveTileSource {
    fn load(&mut self, coord: TileCoord) -> Result<TileData, LoadError> {
        let span = self.span(coord)?.ok_or(LoadError::NotFound(coord))?;
        let mut file = File::open(archive_path(&self.root, coord))?;
        file.seek(SeekFrom::Start(span.offset))?;
        let len = usize::try_from(span.len)
            .map_err(|_| LoadError::Malformed(format!("entry of {} bytes", span.len)))?;
        let mut bytes = vec![0; len];
        file.read_exact(&mut bytes)?;
        codec::decode(&bytes)
    }

    fn describe(&self) -> String {
        format!("tile archives at {}", self.root.display())
    }
}

/// Write tiles into per-block archives under `root`. Returns the archive paths.
pub fn write_archives(
    root: &Path,
    tiles: impl IntoIterator<Item = (TileCoord, TileData)>,
) -> Result<Vec<PathBuf>, LoadError> {
    let mut blocks: BTreeMap<String, Vec<(String, Vec<u8>)>> = BTreeMap::new();
    for (coord, data) in tiles {
        blocks
            .entry(archive_name(coord))
            .or_default()
            .push((tile_file_name(coord), codec::encode(&data)?));
    }

    let mut written = Vec::with_capacity(blocks.len());
    for (name, entries) in blocks {
        let path = root.join(&name);
        let mut builder = tar::Builder::new(File::create(&path)?);
        for (entry_name, bytes) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(bytes.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, entry_name, bytes.as_slice())?;
        }
        builder.finish()?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile(value: f32) -> TileData {
        TileData {
            heights: vec![value; 16],
            material: None,
        }
    }

    #[test]
    fn loads_tiles_from_block_archives() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_archives(
            dir.path(),
            [
                (TileCoord::new(0, 0), tile(1.0)),
                (TileCoord::new(1, 0), tile(2.0)),
                (TileCoord::new(64, 0), tile(3.0)),
            ],
        )
        .unwrap();
        assert_eq!(paths.len(), 2);

        let mut source = ArchiveTileSource::new(dir.path());
        assert_eq!(source.load(TileCoord::new(1, 0)).unwrap(), tile(2.0));
        assert_eq!(source.load(TileCoord::new(0, 0)).unwrap(), tile(1.0));
        assert_eq!(source.load(TileCoord::new(64, 0)).unwrap(), tile(3.0));
    }

    #[test]
    fn missing_entry_or_archive_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        write_archives(dir.path(), [(TileCoord::new(0, 0), tile(1.0))]).unwrap();
        let mut source = ArchiveTileSource::new(dir.path());
        assert!(matches!(source.load(TileCoord::new(5, 5)), Err(LoadError::NotFound(_))));
        assert!(matches!(source.load(TileCoord::new(0, 70)), Err(LoadError::NotFound(_))));
    }
}
