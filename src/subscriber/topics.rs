//! Topic layout for device telemetry.
//!
//! - `<root>/<serial>/data` carries a whole reading.
//! - `<root>/<serial>/chunked/<total>/<index>` carries one part of a reading.

use crate::error::TopicError;

// ---

/// Where an inbound frame should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Single { serial: String },
    Chunk { serial: String, total: u32, index: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicLayout {
    root: String,
}

impl TopicLayout {
    pub fn new(root: impl Into<String>) -> Self {
        let root = root.into();
        Self {
            root: root.trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Filter for single-frame readings.
    pub fn data_filter(&self) -> String {
        format!("{}/+/data", self.root)
    }

    /// Filter for chunked readings.
    pub fn chunked_filter(&self) -> String {
        format!("{}/+/chunked/#", self.root)
    }

    pub fn filters(&self) -> [String; 2] {
        [self.data_filter(), self.chunked_filter()]
    }

    /// Classify a concrete topic. Anything that does not have exactly one of
    /// the two shapes is rejected rather than guessed at.
    pub fn route(&self, topic: &str) -> Result<Route, TopicError> {
        // ---
        let rest = topic
            .strip_prefix(self.root.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| TopicError::ForeignRoot(topic.to_string()))?;

        let malformed = |reason| TopicError::Malformed {
            topic: topic.to_string(),
            reason,
        };

        let segments: Vec<&str> = rest.split('/').collect();
        match segments.as_slice() {
            [serial, "data"] => Ok(Route::Single {
                serial: non_empty(serial).ok_or_else(|| malformed("empty serial number"))?,
            }),
            [serial, "chunked", total, index] => {
                let serial = non_empty(serial).ok_or_else(|| malformed("empty serial number"))?;
                let total = total
                    .parse::<u32>()
                    .map_err(|_| malformed("part count is not a number"))?;
                let index = index
                    .parse::<u32>()
                    .map_err(|_| malformed("part index is not a number"))?;
                Ok(Route::Chunk {
                    serial,
                    total,
                    index,
                })
            }
            [_, "chunked", ..] => Err(malformed("expected chunked/<total>/<index>")),
            _ => Err(malformed("unrecognised topic shape")),
        }
    }
}

fn non_empty(segment: &str) -> Option<String> {
    (!segment.is_empty()).then(|| segment.to_string())
}
