use std::fs;
use std::path::{Path, PathBuf};

use tilestream_common::{GridConfig, TileCoord};
use tilestream_kernel::{TileData, TileSource};

use crate::SourceError;
use crate::archive::{ArchiveTileSource, write_archives};
use crate::descriptor::MapDescriptor;
use crate::layout::StorageLayout;
use crate::loose::{LooseTileSource, write_loose_tile};

/// A validated map ready to stream.
pub struct OpenedMap {
    pub descriptor: MapDescriptor,
    pub grid: GridConfig,
    pub root: PathBuf,
    pub source: Box<dyn TileSource>,
}

impl OpenedMap {
    pub fn layout(&self) -> StorageLayout {
        self.descriptor.layout()
    }

    pub fn is_archived(&self) -> bool {
        self.layout().is_archived()
    }
}

impl std::fmt::Debug for OpenedMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedMap")
            .field("descriptor", &self.descriptor)
            .field("root", &self.root)
            .field("source", &self.source.describe())
            .finish()
    }
}

/// Parse and validate the descriptor at `path`, then load the origin tile to
/// confirm the tile files exist and match the declared tile size.
pub fn open_map(path: &Path) -> Result<OpenedMap, SourceError> {
    let descriptor = MapDescriptor::load(path)?;
    let grid = descriptor.validate()?;
    let root = path.parent().map(Path::to_path_buf).unwrap_or_default();

    let mut source: Box<dyn TileSource> = match descriptor.layout() {
        StorageLayout::Loose => Box::new(LooseTileSource::new(&root)),
        StorageLayout::Archived => Box::new(ArchiveTileSource::new(&root)),
    };
    probe_origin(source.as_mut(), grid.tile_size)?;
    tracing::info!(
        map = %path.display(),
        layout = ?descriptor.layout(),
        tiles_x = grid.num_tiles_x,
        tiles_z = grid.num_tiles_z,
        "map opened"
    );
    Ok(OpenedMap {
        descriptor,
        grid,
        root,
        source,
    })
}

/// Load tile `(0, 0)` and check its edge length.
pub fn probe_origin(source: &mut dyn TileSource, tile_size: u32) -> Result<(), SourceError> {
    let origin = source
        .load(TileCoord::new(0, 0))
        .map_err(SourceError::OriginMissing)?;
    let expected = tile_size as usize + 1;
    let actual = (origin.heights.len() as f64).sqrt().round() as usize;
    if actual * actual != origin.heights.len() || actual != expected {
        return Err(SourceError::OriginSizeMismatch {
            expected: tile_size,
            actual: actual.saturating_sub(1) as u32,
        });
    }
    Ok(())
}

/// Write `descriptor` as `<root>/<name>.map` and the tiles in its layout.
/// Returns the descriptor path.
pub fn write_map(
    root: &Path,
    name: &str,
    descriptor: &MapDescriptor,
    tiles: impl IntoIterator<Item = (TileCoord, TileData)>,
) -> Result<PathBuf, SourceError> {
    fs::create_dir_all(root)?;
    let mut files = 0usize;
    match descriptor.layout() {
        StorageLayout::Loose => {
            for (coord, data) in tiles {
                write_loose_tile(root, coord, &data)?;
                files += 1;
            }
        }
        StorageLayout::Archived => {
            files = write_archives(root, tiles)?.len();
        }
    }
    let path = root.join(format!("{name}.map"));
    fs::write(&path, descriptor.to_legacy())?;
    tracing::info!(map = %path.display(), layout = ?descriptor.layout(), files, "map written");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procedural::ProceduralSource;
    use tilestream_common::ConfigError;
    use tilestream_kernel::LoadError;

    fn corner_tiles(source: &ProceduralSource) -> Vec<(TileCoord, TileData)> {
        [(0, 0), (1, 0), (0, 1)]
            .into_iter()
            .map(|(x, z)| {
                let c = TileCoord::new(x, z);
                (c, source.generate(c))
            })
            .collect()
    }

    #[test]
    fn loose_map_opens_and_loads() {
        let dir = tempfile::tempdir().unwrap();
        let procedural = ProceduralSource::new(256, 3);
        let desc = MapDescriptor::new(16, 16, 256, 1);
        let path = write_map(dir.path(), "demo", &desc, corner_tiles(&procedural)).unwrap();

        let mut map = open_map(&path).unwrap();
        assert!(!map.is_archived());
        assert_eq!(map.grid.num_tiles_x, 16);
        let tile = map.source.load(TileCoord::new(1, 0)).unwrap();
        assert_eq!(tile, procedural.generate(TileCoord::new(1, 0)));
        assert!(matches!(map.source.load(TileCoord::new(5, 5)), Err(LoadError::NotFound(_))));
    }

    #[test]
    fn archived_map_opens() {
        let dir = tempfile::tempdir().unwrap();
        let procedural = ProceduralSource::new(256, 3);
        let mut desc = MapDescriptor::new(16, 16, 256, 2);
        desc.archived = true;
        let path = write_map(dir.path(), "packed", &desc, corner_tiles(&procedural)).unwrap();
        assert!(dir.path().join("DIR-0000.tar").exists());

        let mut map = open_map(&path).unwrap();
        assert!(map.is_archived());
        assert!(map.source.load(TileCoord::new(0, 1)).is_ok());
    }

    #[test]
    fn missing_origin_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        let procedural = ProceduralSource::new(256, 3);
        let desc = MapDescriptor::new(16, 16, 256, 1);
        let c = TileCoord::new(1, 1);
        let path = write_map(dir.path(), "holey", &desc, [(c, procedural.generate(c))]).unwrap();
        assert!(matches!(open_map(&path), Err(SourceError::OriginMissing(_))));
    }

    #[test]
    fn origin_size_must_match_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let procedural = ProceduralSource::new(256, 3);
        let desc = MapDescriptor::new(16, 16, 512, 1);
        let path = write_map(dir.path(), "wrong", &desc, corner_tiles(&procedural)).unwrap();
        assert!(matches!(
            open_map(&path),
            Err(SourceError::OriginSizeMismatch { expected: 512, actual: 256 })
        ));
    }

    #[test]
    fn invalid_descriptor_fails_before_probe() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.map");
        fs::write(&path, MapDescriptor::new(16, 16, 256, 0).to_legacy()).unwrap();
        assert!(matches!(
            open_map(&path),
            Err(SourceError::Config(ConfigError::ZeroScale))
        ));
    }
}
