/*!
Module with basic types used in memscope.

This module contains types for handling virtual and physical addresses,
page types and byte sizes.
*/

pub mod address;
#[doc(hidden)]
pub use address::Address;

pub mod size;

pub mod page;
#[doc(hidden)]
pub use page::{PageType, PermissionFlags};

pub mod physical_address;
#[doc(hidden)]
pub use physical_address::PhysicalAddress;
