//! Local file handling.

pub mod image;

pub use image::DiskImage;
