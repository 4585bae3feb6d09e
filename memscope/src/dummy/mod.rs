/*!
In-memory backend used for testing.

[`DummyMemory`] is a buffer of fake physical memory with window accounting,
[`DummyOs`] builds real x86-64 page tables for fake processes inside of it and
resolves them like a kernel would, and [`DummyCaller`] stands in for the memory
of a requesting process.
*/

pub mod caller;
pub mod mem;
pub mod os;

pub use caller::DummyCaller;
pub use mem::DummyMemory;
pub use os::DummyOs;
