//! Display Components
//!
//! Host-agnostic UI components over the media layer. A component exposes its
//! state through a watch channel and describes what to draw with `render`;
//! the host turns that into markup.

mod image;

pub use image::{
    AuthenticatedImage, DisplayState, ErrorCallback, ImageProps, LoadCallback, Rendered,
    PLACEHOLDER_TEXT,
};
