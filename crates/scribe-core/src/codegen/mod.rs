//! Code generation: notebook cells to a single instrumented program plus a
//! mapping back to cell coordinates.

pub mod generator;
pub mod imports;
pub mod mapping;

pub use generator::{
    CodeGenerator, ENTRY_FUNCTION, ENTRY_PARAMS, GeneratedSource, GeneratedUnit, top_level_names,
};
pub use mapping::{CellLocation, MappedLine, Mapping};
