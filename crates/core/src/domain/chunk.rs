use serde::{Deserialize, Serialize};

/// One incrementally delivered piece of a response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseChunk {
    pub sequence: u64,
    pub text: String,
    pub is_final: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Character,
    Word,
    Line,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Character => "character",
            Self::Word => "word",
            Self::Line => "line",
        }
    }
}
