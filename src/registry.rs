use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::{ReaderBuilder, Trim};
use serde::Deserialize;
use tracing::{debug, info};

use crate::domain::BoundingBox;
use crate::error::FetchError;

const LONGITUDE_COLUMN: &str = "xlong";
const LATITUDE_COLUMN: &str = "ylat";

#[derive(Debug, Deserialize)]
struct TurbineRow {
    #[serde(default, deserialize_with = "csv::invalid_option")]
    xlong: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    ylat: Option<f64>,
}

pub fn load_turbine_coordinates(path: &Path) -> Result<Vec<(f64, f64)>, FetchError> {
    let read_error = |message: String| FetchError::RegistryRead {
        path: path.to_path_buf(),
        message,
    };
    let file = File::open(path).map_err(|err| read_error(err.to_string()))?;
    parse_coordinates(file).map_err(read_error)
}

fn parse_coordinates<R: Read>(source: R) -> Result<Vec<(f64, f64)>, String> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(source);

    let headers = reader.headers().map_err(|err| err.to_string())?;
    for name in [LONGITUDE_COLUMN, LATITUDE_COLUMN] {
        if !headers.iter().any(|column| column == name) {
            return Err(format!("missing column {name}"));
        }
    }

    let mut coords = Vec::new();
    let mut skipped = 0usize;
    for row in reader.deserialize::<TurbineRow>() {
        match row {
            Ok(TurbineRow {
                xlong: Some(lon),
                ylat: Some(lat),
            }) if lon.is_finite() && lat.is_finite() => coords.push((lon, lat)),
            Ok(_) => skipped += 1,
            Err(err) => {
                debug!(error = %err, "unreadable registry row");
                skipped += 1;
            }
        }
    }
    if skipped > 0 {
        debug!(skipped, "skipped registry rows without coordinates");
    }
    Ok(coords)
}

pub fn registry_bounding_box(path: &Path, margin: f64) -> Result<BoundingBox, FetchError> {
    let coords = load_turbine_coordinates(path)?;
    let count = coords.len();
    let bbox = BoundingBox::enclosing(coords, margin)
        .ok_or_else(|| FetchError::EmptyRegistry(path.to_path_buf()))?;
    info!(turbines = count, bbox = %bbox, "computed bounding box from registry");
    Ok(bbox)
}
