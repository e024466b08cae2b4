//! Implementation limits for parsing and execution.
//!
//! Counts claimed by a module are checked against these ceilings before
//! anything is allocated, so that a short malformed input cannot request an
//! unrealistic amount of memory.

/// Maximum number of type definitions in a module
pub const MAX_TYPES: u32 = 1_000_000;

/// Maximum number of imports in a module
pub const MAX_IMPORTS: u32 = 1_000_000;

/// Maximum number of defined functions in a module
pub const MAX_FUNCTIONS: u32 = 1_000_000;

/// Maximum number of globals in a module
pub const MAX_GLOBALS: u32 = 1_000_000;

/// Maximum number of exports in a module
pub const MAX_EXPORTS: u32 = 1_000_000;

/// Maximum number of element segments in a module
pub const MAX_ELEMENT_SEGMENTS: u32 = 100_000;

/// Maximum number of data segments in a module
pub const MAX_DATA_SEGMENTS: u32 = 100_000;

/// Maximum number of function parameters
pub const MAX_FUNCTION_PARAMS: u32 = 1_000;

/// Maximum number of local variables in a function, parameters included
pub const MAX_FUNCTION_LOCALS: u32 = 50_000;

/// Maximum number of labels in a br_table instruction
pub const MAX_BR_TABLE_LABELS: u32 = 65_536;

/// Maximum initial table size (number of elements)
pub const MAX_TABLE_SIZE: u32 = 10_000_000;

/// Maximum linear memory size in 64 KiB pages (4 GiB of address space)
pub const MAX_MEMORY_PAGES: u32 = 65_536;

/// Default hard ceiling for memory growth, in pages (16 MiB).
///
/// Instantiation may override this, but `memory.grow` never exceeds it,
/// even for a module whose memory declares no maximum.
pub const DEFAULT_MEMORY_PAGES_LIMIT: u32 = 256;

/// Maximum call depth before execution traps with stack exhaustion
pub const CALL_STACK_LIMIT: u32 = 2_048;
