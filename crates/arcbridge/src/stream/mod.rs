//! Stream adapters handed to the engine.

mod adapter;
pub mod multi_volume;
mod null_sink;

pub use adapter::{InStreamAdapter, OutStreamAdapter};
pub use multi_volume::{MultiVolumeReader, MultiVolumeWriter, VolumeMap, volume_path};
pub use null_sink::NullSink;
