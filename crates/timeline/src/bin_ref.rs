use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

use crate::{Frame, Zone};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BinRefError {
    #[error("empty bin reference")]
    Empty,
    #[error("malformed bin reference: {0}")]
    Malformed(String),
    #[error("invalid range {start}..={end} in bin reference")]
    InvalidRange { start: Frame, end: Frame },
}

/// Reference to a bin source, optionally narrowed to a frame range.
///
/// Text form: `<source-id>` or `<source-id>#<range-start>#<range-end-inclusive>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BinClipRef {
    pub source_id: String,
    /// Inclusive `(start, end)`.
    pub range: Option<(Frame, Frame)>,
}

impl BinClipRef {
    pub fn whole(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            range: None,
        }
    }

    /// Reference covering the half-open `zone` of a source.
    pub fn zone(source_id: impl Into<String>, zone: Zone) -> Result<Self, BinRefError> {
        if zone.end <= zone.start {
            return Err(BinRefError::InvalidRange {
                start: zone.start,
                end: zone.end - 1,
            });
        }
        Ok(Self {
            source_id: source_id.into(),
            range: Some((zone.start, zone.end - 1)),
        })
    }

    pub fn in_point(&self) -> Frame {
        self.range.map_or(0, |(start, _)| start)
    }

    /// Frames covered by the range, `None` for the whole source.
    pub fn length(&self) -> Option<Frame> {
        self.range.map(|(start, end)| end - start + 1)
    }
}

impl fmt::Display for BinClipRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.range {
            Some((start, end)) => write!(f, "{}#{}#{}", self.source_id, start, end),
            None => write!(f, "{}", self.source_id),
        }
    }
}

impl FromStr for BinClipRef {
    type Err = BinRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('#');
        let source_id = parts.next().unwrap_or_default();
        if source_id.is_empty() {
            return Err(BinRefError::Empty);
        }
        let bounds: Vec<&str> = parts.collect();
        let range = match bounds.as_slice() {
            [] => None,
            [start, end] => {
                let parse = |v: &str| {
                    v.trim()
                        .parse::<Frame>()
                        .map_err(|_| BinRefError::Malformed(s.to_string()))
                };
                let (start, end) = (parse(*start)?, parse(*end)?);
                if start < 0 || end < start {
                    return Err(BinRefError::InvalidRange { start, end });
                }
                Some((start, end))
            }
            _ => return Err(BinRefError::Malformed(s.to_string())),
        };
        Ok(Self {
            source_id: source_id.to_string(),
            range,
        })
    }
}

impl TryFrom<String> for BinClipRef {
    type Error = BinRefError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BinClipRef> for String {
    fn from(value: BinClipRef) -> Self {
        value.to_string()
    }
}
