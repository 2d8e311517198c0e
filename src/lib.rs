//! Loader and interpreter for the Karel 99 robot language.
//!
//! A Karel 99 source file (`.K99`, ISO-8859-2 encoded, with Czech keyword
//! aliases) describes a grid world and a set of named routines that move a
//! robot around it, turning, placing and picking up flags. [`load`] turns the
//! raw source into a [`World`] and an immutable [`Program`]; [`execute`] runs
//! one named routine against them, recursively, until it finishes, fails, or
//! an external [`StopSignal`] asks it to unwind.

pub mod interp;
pub mod parse;
pub mod translate;
pub mod world;

pub use interp::{execute, run, ExecError, Halt, Instr, PrintSink, Program, StopSignal};
pub use parse::{load, load_bytes, LoadError, Loaded};
pub use world::{Cell, Direction, Predicate, World};

/// Tunables shared by the loader and the interpreter.
///
/// The grid is always `grid_size` × `grid_size`; a source file declares a map
/// that may be smaller, and `wall_outside_map` decides whether the surplus
/// cells are empty or walled off.
#[derive(Clone, Debug)]
pub struct Config {
    /// Fixed side length of the world grid.
    pub grid_size: usize,
    /// Largest flag count a single cell can hold.
    pub max_flags: u8,
    /// Fill cells outside the declared map with walls instead of leaving
    /// them empty.
    pub wall_outside_map: bool,
    /// Routine call depth at which execution gives up with
    /// [`ExecError::CallDepthExceeded`] instead of exhausting the host stack.
    pub max_call_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            grid_size: 20,
            max_flags: 8,
            wall_outside_map: false,
            max_call_depth: 1024,
        }
    }
}

/// Either half of the pipeline can fail; see [`LoadError`] and [`ExecError`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Exec(#[from] ExecError),
}
