/*!
This module covers all implementations and traits related to
reading and writing physical memory and to copying bytes
across the caller boundary.

The [`PhysicalMemory`] trait is used by the page walk to read page table
entries. Data pages themselves are only ever touched through short lived
[physical windows](window/index.html) handed out by a [`PhysicalMapper`].
*/

pub mod phys_mem;
#[doc(hidden)]
pub use phys_mem::{PhysicalMemory, PhysicalMemoryMetadata};

pub mod window;
#[doc(hidden)]
pub use window::{access, Direction, MapCapability, PhysicalMapper, PhysicalWindow};

pub mod caller;
#[doc(hidden)]
pub use caller::{CallerBuffer, CallerMemory, CallerSource};
