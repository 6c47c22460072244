//! Metadata tokens identifying types and members within the compiled-unit model.
//!
//! Every metadata entity a mock can target - a type, a method, a field, or a
//! cross-unit reference - is addressed by a [`Token`]: a 32-bit value whose high
//! byte names the metadata table and whose low 24 bits are the row within it.
//! Tokens are the stable identities the instruction matcher, the type registry
//! and the unit pool key on.
//!
//! Unlike on-disk metadata formats, rows are allocated from process-wide atomic
//! counters, so a token minted anywhere in the process is unique across all
//! compiled units of a session. Cross-unit references therefore never need a
//! resolution scope to disambiguate.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Table id for type definitions.
pub const TABLE_TYPE_DEF: u8 = 0x02;
/// Table id for type references imported from another unit.
pub const TABLE_TYPE_REF: u8 = 0x01;
/// Table id for field definitions.
pub const TABLE_FIELD: u8 = 0x04;
/// Table id for method definitions.
pub const TABLE_METHOD_DEF: u8 = 0x06;
/// Table id for member references imported from another unit.
pub const TABLE_MEMBER_REF: u8 = 0x0A;

static NEXT_ROW: [AtomicU32; 5] = [
    AtomicU32::new(1),
    AtomicU32::new(1),
    AtomicU32::new(1),
    AtomicU32::new(1),
    AtomicU32::new(1),
];

fn table_slot(table: u8) -> usize {
    match table {
        TABLE_TYPE_DEF => 0,
        TABLE_TYPE_REF => 1,
        TABLE_FIELD => 2,
        TABLE_METHOD_DEF => 3,
        _ => 4,
    }
}

/// A metadata token representing a reference to a metadata table entry.
///
/// Tokens consist of a 32-bit value where:
/// - The high byte (bits 24-31) indicates the table type
/// - The low 24 bits (bits 0-23) indicate the row index within that table
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub u32);

impl Token {
    /// Creates a new token from a raw 32-bit value
    #[must_use]
    pub fn new(value: u32) -> Self {
        Token(value)
    }

    /// Allocates a fresh token in the given table from the process-wide row counters.
    #[must_use]
    pub(crate) fn alloc(table: u8) -> Self {
        let row = NEXT_ROW[table_slot(table)].fetch_add(1, Ordering::Relaxed);
        Token((u32::from(table) << 24) | (row & 0x00FF_FFFF))
    }

    /// Returns the raw token value
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Extracts the table type from the token (high byte)
    #[must_use]
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Extracts the row index from the token (low 24 bits)
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// Returns true if this is a null token (value 0)
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Returns true if this token is a cross-unit reference rather than a definition.
    #[must_use]
    pub fn is_reference(&self) -> bool {
        matches!(self.table(), TABLE_TYPE_REF | TABLE_MEMBER_REF)
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token(0x{:08x}, table: 0x{:02x}, row: {})",
            self.0,
            self.table(),
            self.row()
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}
