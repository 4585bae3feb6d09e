/*!
Module containing basic connector building blocks.

Connectors are configured through [`ConnectorArgs`]. This module provides a file
and memory device backed physical memory with mapped windows (feature `filemap`)
and a resolver exposing the address space of a raw memory image.
*/

pub mod args;
#[doc(hidden)]
pub use args::ConnectorArgs;

pub mod image;
#[doc(hidden)]
pub use image::{parse_address, ImageResolver};

#[cfg(all(unix, feature = "filemap"))]
pub mod filemap;
#[doc(hidden)]
#[cfg(all(unix, feature = "filemap"))]
pub use filemap::FileMappedMemory;

#[cfg(all(unix, feature = "filemap"))]
use crate::{engine::Engine, error::Result};

/// Opens a raw memory image as an engine.
///
/// The default argument is the path of the image, the address space is described
/// as documented on [`ImageResolver::with_args`]. `rw=false` opens the image read-only.
#[cfg(all(unix, feature = "filemap"))]
pub fn create_image_engine(args: &ConnectorArgs) -> Result<Engine<ImageResolver, FileMappedMemory>> {
    use crate::error::{Error, ErrorKind, ErrorOrigin};

    let path = args.get_default().ok_or_else(|| {
        Error(ErrorOrigin::Args, ErrorKind::Configuration).log_error("missing image path")
    })?;
    let writeable = args.get_parsed::<bool>("rw")?.unwrap_or(true);

    let mem = FileMappedMemory::open(path, writeable)?;
    let resolver = ImageResolver::with_args(args)?;
    Ok(Engine::new(resolver, mem))
}
