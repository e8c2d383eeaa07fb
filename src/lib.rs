//! # Pixel Stack Mesher
//!
//! A Rust library for turning palette-reduced images into stacked,
//! multi-material 3D-printable solids.
//!
//! ## Overview
//!
//! Each pixel gets a height, either from a manual color-to-layer assignment
//! or derived automatically from luminance or perceptual color distance. The
//! height field is cut into one occupancy mask per color layer and every mask
//! becomes a closed, welded, T-junction-free mesh via greedy rectangles.
//! Layer meshes stack flush on top of each other.
//!
//! ## Quick Start
//!
//! ```ignore
//! use pixel_stack_mesher::{
//!     load_image, BuildParams, Checkpoint, Detail, LayerSpec, Progress, StackMesher,
//! };
//!
//! let image = load_image("logo.png")?;
//! let params = BuildParams::with_layers(vec![
//!     LayerSpec::new(0, "#ffffff", 0.6),
//!     LayerSpec::new(1, "#000000", 0.4),
//! ]);
//!
//! let mesher = StackMesher::new(params)?;
//! let outcome = mesher.build(
//!     &image,
//!     Detail::default(),
//!     &mut Checkpoint::unbounded(),
//!     &mut Progress::silent(),
//! )?;
//! ```
//!
//! ## Interactive use
//!
//! Editors that rebuild on every parameter change should go through
//! [`BuildScheduler`], which debounces changes, publishes a coarse preview
//! first and cancels superseded builds cooperatively. The latest model is
//! available from a [`CurrentModel`] handle.

pub mod cancel;
pub mod crop;
pub mod error;
pub mod export;
pub mod height;
pub mod mesher;
pub mod progress;
pub mod scheduler;
pub mod segment;
pub mod types;

// Re-export main types for convenience
pub use cancel::{BuildToken, Cancelled, Checkpoint, Clock, ManualClock, SystemClock, TokenSource};
pub use crop::{CropBounds, RasterCrop};
pub use error::{MesherError, Result};
pub use export::obj::{export_obj, ObjExport};
pub use height::{HeightField, HeightSource, LayerStack};
pub use mesher::{
    fingerprint, BuildOutcome, Detail, LayerMesh, MeshBuffer, StackMesher, StackModel,
};
pub use progress::Progress;
pub use scheduler::{
    BuildPhase, BuildRequest, BuildScheduler, CurrentModel, SchedulerConfig, SchedulerEvent,
    SchedulerHandle, SchedulerState,
};
pub use segment::OccupancyMask;
pub use types::{
    AutoPaintOptions, BoundingBox, BuildParams, ColorMatching, HeightMode, LayerSpec, Rgb,
};

/// Load and decode an image from a file path.
pub fn load_image<P: AsRef<std::path::Path>>(path: P) -> Result<image::RgbaImage> {
    Ok(image::open(path)?.to_rgba8())
}

/// Decode an image from encoded bytes (e.g. a PNG upload).
pub fn load_image_from_bytes(data: &[u8]) -> Result<image::RgbaImage> {
    Ok(image::load_from_memory(data)?.to_rgba8())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_png_from_bytes() {
        let image = image::RgbaImage::from_pixel(3, 2, image::Rgba([10, 20, 30, 255]));
        let mut encoded = std::io::Cursor::new(Vec::new());
        image
            .write_to(&mut encoded, image::ImageFormat::Png)
            .unwrap();

        let decoded = load_image_from_bytes(encoded.get_ref()).unwrap();
        assert_eq!(decoded, image);
    }

    #[test]
    fn test_garbage_bytes_are_an_image_error() {
        assert!(matches!(
            load_image_from_bytes(b"not an image"),
            Err(MesherError::Image(_))
        ));
    }
}
