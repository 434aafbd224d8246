//! Native [`NativeDisplay`](crate::display::NativeDisplay) implementations.

#[cfg(feature = "x11")]
pub mod xlib;

#[cfg(feature = "x11")]
pub use self::xlib::XlibDisplay;
