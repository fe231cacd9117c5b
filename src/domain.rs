use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FetchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Month(u8);

impl Month {
    pub fn new(value: u8) -> Result<Self, FetchError> {
        if (1..=12).contains(&value) {
            Ok(Self(value))
        } else {
            Err(FetchError::InvalidMonth(value.to_string()))
        }
    }

    pub fn number(self) -> u8 {
        self.0
    }

    pub fn all() -> impl Iterator<Item = Month> {
        (1..=12).map(Month)
    }
}

impl TryFrom<u8> for Month {
    type Error = FetchError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Month::new(value)
    }
}

impl From<Month> for u8 {
    fn from(month: Month) -> Self {
        month.0
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}", self.0)
    }
}

impl FromStr for Month {
    type Err = FetchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let number = value
            .trim()
            .parse::<u8>()
            .map_err(|_| FetchError::InvalidMonth(value.to_string()))?;
        Month::new(number)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub north: f64,
    pub west: f64,
    pub south: f64,
    pub east: f64,
}

impl BoundingBox {
    pub fn enclosing<I>(coords: I, margin: f64) -> Option<Self>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        let mut iter = coords.into_iter();
        let (lon, lat) = iter.next()?;
        let mut bbox = BoundingBox {
            north: lat,
            west: lon,
            south: lat,
            east: lon,
        };
        for (lon, lat) in iter {
            bbox.north = bbox.north.max(lat);
            bbox.south = bbox.south.min(lat);
            bbox.west = bbox.west.min(lon);
            bbox.east = bbox.east.max(lon);
        }
        Some(BoundingBox {
            north: bbox.north + margin,
            west: bbox.west - margin,
            south: bbox.south - margin,
            east: bbox.east + margin,
        })
    }

    pub fn validate(&self) -> Result<(), FetchError> {
        let values = [self.north, self.west, self.south, self.east];
        if values.iter().any(|value| !value.is_finite()) {
            return Err(FetchError::ConfigInvalid(format!(
                "area has non-finite bounds: {self}"
            )));
        }
        if self.north < self.south {
            return Err(FetchError::ConfigInvalid(format!(
                "area north {} is below south {}",
                self.north, self.south
            )));
        }
        Ok(())
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.north, self.west, self.south, self.east
        )
    }
}
