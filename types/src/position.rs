//! Positions, ranges and locations on the tool surface.
//!
//! The tool surface pins lines as 1-based and characters as 0-based. The
//! language-server wire uses 0-based lines; conversion happens only through
//! [`Position::from_wire`] and [`Position::wire_line`], so the two conventions
//! never mix.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line numbers are 1-based; got line {line}")]
pub struct InvalidPosition {
    pub line: u32,
}

/// A cursor position as tool callers see it: 1-based line, 0-based character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawPosition")]
pub struct Position {
    line: u32,
    character: u32,
}

#[derive(Deserialize)]
struct RawPosition {
    line: u32,
    character: u32,
}

impl TryFrom<RawPosition> for Position {
    type Error = InvalidPosition;

    fn try_from(raw: RawPosition) -> Result<Self, Self::Error> {
        Self::new(raw.line, raw.character)
    }
}

impl Position {
    pub fn new(line: u32, character: u32) -> Result<Self, InvalidPosition> {
        if line == 0 {
            return Err(InvalidPosition { line });
        }
        Ok(Self { line, character })
    }

    /// Build from a 0-based wire line.
    #[must_use]
    pub fn from_wire(line: u32, character: u32) -> Self {
        Self {
            line: line.saturating_add(1),
            character,
        }
    }

    /// 1-based line.
    #[must_use]
    pub fn line(self) -> u32 {
        self.line
    }

    /// 0-based character offset.
    #[must_use]
    pub fn character(self) -> u32 {
        self.character
    }

    /// The 0-based line sent to the analyzer.
    #[must_use]
    pub fn wire_line(self) -> u32 {
        self.line - 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

/// A span inside a file returned by the analyzer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub uri: String,
    /// Workspace-relative path when the location is inside the workspace,
    /// the absolute path otherwise, absent for non-file URIs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub range: Range,
}

/// Hover contents flattened to plain markup strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoverInfo {
    pub contents: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
}
