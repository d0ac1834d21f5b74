use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tilestream_common::{DEFAULT_MAX_GRID_DIM, GridConfig};

use crate::SourceError;
use crate::layout::StorageLayout;

/// Current descriptor format version written by [`MapDescriptor::to_legacy`].
pub const MAP_VERSION: u32 = 19;

/// Kind of data the map's tile files hold. Only terrain maps can be streamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TileType {
    Image,
    Terrain,
    Node,
}

impl TileType {
    fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Terrain => "terrain",
            Self::Node => "node",
        }
    }
}

impl fmt::Display for TileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static description of a tiled terrain map.
///
/// Read either from the line-oriented `.map` format
///
/// ```text
/// tiledTerrain : 19
/// useJars   : false
/// numTilesX : 64
/// numTilesZ : 64
/// tileSize  : 256
/// tileScale : 2
/// tileType  : terrain
/// ```
///
/// or from YAML with the same keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapDescriptor {
    #[serde(rename = "tiledTerrain")]
    pub version: u32,
    #[serde(rename = "useJars", alias = "archived", default)]
    pub archived: bool,
    pub num_tiles_x: u32,
    pub num_tiles_z: u32,
    pub tile_size: u32,
    pub tile_scale: u32,
    pub tile_type: TileType,
}

impl MapDescriptor {
    pub fn new(num_tiles_x: u32, num_tiles_z: u32, tile_size: u32, tile_scale: u32) -> Self {
        Self {
            version: MAP_VERSION,
            archived: false,
            num_tiles_x,
            num_tiles_z,
            tile_size,
            tile_scale,
            tile_type: TileType::Terrain,
        }
    }

    /// Read and parse a descriptor file. `.yaml`/`.yml` files are read as
    /// YAML, anything else by content.
    pub fn load(path: &Path) -> Result<Self, SourceError> {
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => Self::from_yaml(&text),
            _ => Self::parse(&text),
        }
    }

    /// Parse either format: the line format when the text starts with the
    /// `tiledTerrain` header, YAML otherwise.
    pub fn parse(text: &str) -> Result<Self, SourceError> {
        let first = text.lines().map(str::trim).find(|l| !l.is_empty());
        match first {
            Some(line) if line.starts_with("tiledTerrain") => Self::parse_legacy(text),
            _ => Self::from_yaml(text),
        }
    }

    pub fn from_yaml(text: &str) -> Result<Self, SourceError> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn to_yaml(&self) -> Result<String, SourceError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Parse the `key : value` line format. Keys may appear in any order;
    /// unknown keys are ignored.
    pub fn parse_legacy(text: &str) -> Result<Self, SourceError> {
        let mut fields = LegacyFields::default();
        for (n, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                return Err(SourceError::Descriptor {
                    line: n + 1,
                    msg: format!("expected `key : value`, got {line:?}"),
                });
            };
            let (key, value) = (key.trim(), value.trim());
            let number = || {
                value.parse::<u32>().map_err(|e| SourceError::Descriptor {
                    line: n + 1,
                    msg: format!("{key}: {e}"),
                })
            };
            match key {
                "tiledTerrain" => fields.version = Some(number()?),
                "useJars" => fields.archived = Some(value.eq_ignore_ascii_case("true")),
                "numTilesX" => fields.num_tiles_x = Some(number()?),
                "numTilesZ" => fields.num_tiles_z = Some(number()?),
                "tileSize" => fields.tile_size = Some(number()?),
                "tileScale" => fields.tile_scale = Some(number()?),
                "tileType" => {
                    let kind = value.split_whitespace().next().unwrap_or_default();
                    fields.tile_type = Some(match kind {
                        "terrain" => TileType::Terrain,
                        "image" => TileType::Image,
                        "node" => TileType::Node,
                        other => {
                            return Err(SourceError::Descriptor {
                                line: n + 1,
                                msg: format!("unknown tile type {other:?}"),
                            });
                        }
                    });
                }
                other => tracing::debug!(key = other, line = n + 1, "ignoring unknown map key"),
            }
        }
        fields.finish()
    }

    /// Render in the line format.
    pub fn to_legacy(&self) -> String {
        self.to_string()
    }

    pub fn layout(&self) -> StorageLayout {
        StorageLayout::from_archived(self.archived)
    }

    /// Check the descriptor and produce the grid it describes.
    pub fn validate(&self) -> Result<GridConfig, SourceError> {
        if self.tile_type != TileType::Terrain {
            return Err(SourceError::UnsupportedTileType(self.tile_type));
        }
        let grid = self.grid_config();
        grid.validate()?;
        Ok(grid)
    }

    pub fn grid_config(&self) -> GridConfig {
        GridConfig {
            num_tiles_x: self.num_tiles_x,
            num_tiles_z: self.num_tiles_z,
            tile_size: self.tile_size,
            tile_scale: self.tile_scale,
            max_grid_dim: DEFAULT_MAX_GRID_DIM,
        }
    }
}

impl fmt::Display for MapDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "tiledTerrain : {}", self.version)?;
        writeln!(f, "useJars   : {}", self.archived)?;
        writeln!(f, "numTilesX : {}", self.num_tiles_x)?;
        writeln!(f, "numTilesZ : {}", self.num_tiles_z)?;
        writeln!(f, "tileSize  : {}", self.tile_size)?;
        writeln!(f, "tileScale : {}", self.tile_scale)?;
        writeln!(f, "tileType  : {}", self.tile_type)
    }
}

#[derive(Default)]
struct LegacyFields {
    version: Option<u32>,
    archived: Option<bool>,
    num_tiles_x: Option<u32>,
    num_tiles_z: Option<u32>,
    tile_size: Option<u32>,
    tile_scale: Option<u32>,
    tile_type: Option<TileType>,
}

impl LegacyFields {
    fn finish(self) -> Result<MapDescriptor, SourceError> {
        let missing = |key: &'static str| SourceError::MissingKey(key);
        Ok(MapDescriptor {
            version: self.version.ok_or_else(|| missing("tiledTerrain"))?,
            archived: self.archived.unwrap_or(false),
            num_tiles_x: self.num_tiles_x.ok_or_else(|| missing("numTilesX"))?,
            num_tiles_z: self.num_tiles_z.ok_or_else(|| missing("numTilesZ"))?,
            tile_size: self.tile_size.ok_or_else(|| missing("tileSize"))?,
            tile_scale: self.tile_scale.ok_or_else(|| missing("tileScale"))?,
            tile_type: self.tile_type.ok_or_else(|| missing("tileType"))?,
        })
    }
}
