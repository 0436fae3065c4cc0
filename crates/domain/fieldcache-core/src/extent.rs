use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Envelope that bounds a download.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Extent {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
    pub wkid: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtentError {
    #[error("extent needs four comma-separated numbers (xmin,ymin,xmax,ymax), got '{0}'")]
    Format(String),
    #[error("extent coordinate '{0}' is not a finite number")]
    Coordinate(String),
    #[error("extent is empty or inverted: min must be below max on both axes")]
    Inverted,
}

impl Extent {
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64, wkid: u32) -> Result<Self, ExtentError> {
        for v in [xmin, ymin, xmax, ymax] {
            if !v.is_finite() {
                return Err(ExtentError::Coordinate(v.to_string()));
            }
        }
        if xmin >= xmax || ymin >= ymax {
            return Err(ExtentError::Inverted);
        }
        Ok(Self {
            xmin,
            ymin,
            xmax,
            ymax,
            wkid,
        })
    }

    pub fn with_wkid(mut self, wkid: u32) -> Self {
        self.wkid = wkid;
        self
    }

    pub fn width(&self) -> f64 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f64 {
        self.ymax - self.ymin
    }

    /// Envelope JSON in the shape feature services expect for `geometry`.
    pub fn to_envelope_json(&self) -> serde_json::Value {
        serde_json::json!({
            "xmin": self.xmin,
            "ymin": self.ymin,
            "xmax": self.xmax,
            "ymax": self.ymax,
            "spatialReference": { "wkid": self.wkid },
        })
    }
}

impl FromStr for Extent {
    type Err = ExtentError;

    /// Parses `xmin,ymin,xmax,ymax` in WGS84.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(ExtentError::Format(s.to_string()));
        }
        let mut values = [0f64; 4];
        for (slot, raw) in values.iter_mut().zip(&parts) {
            *slot = raw
                .parse::<f64>()
                .map_err(|_| ExtentError::Coordinate(raw.to_string()))?;
        }
        Extent::new(values[0], values[1], values[2], values[3], 4326)
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{} (wkid {})",
            self.xmin, self.ymin, self.xmax, self.ymax, self.wkid
        )
    }
}
