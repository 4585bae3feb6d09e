/*!
This crate contains the core of memscope's cross-process memory access.

It resolves a target process to its memory context, walks the page tables
of that context to turn a virtual address into a physical one and copies
bytes through short lived physical windows.

It contains abstractions over [memory addresses](types/index.html),
[page-table layouts](architecture/index.html),
[physical memory and windows](mem/index.html),
[processes and their memory regions](process/index.html) and the
[request dispatcher](dispatch/index.html) that sits on top of them.
*/

pub mod error;
#[doc(hidden)]
pub use error::*;

pub mod types;
#[doc(hidden)]
pub use types::*;

pub mod architecture;
#[doc(hidden)]
pub use architecture::*;

pub mod mem;
#[doc(hidden)]
pub use mem::*;

pub mod connector;
#[doc(hidden)]
pub use connector::*;

pub mod process;
#[doc(hidden)]
pub use process::*;

pub mod engine;
#[doc(hidden)]
pub use engine::Engine;

pub mod dispatch;
#[doc(hidden)]
pub use dispatch::{Dispatcher, DispatcherConfig, StatusMode};

#[cfg(any(test, feature = "dummy_mem"))]
pub mod dummy;
