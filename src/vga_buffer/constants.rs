//! Fixed dimensions of the standard VGA text-mode framebuffer.

/// Number of character rows in VGA text mode 80x25.
pub const BUFFER_HEIGHT: usize = 25;
/// Number of character columns in VGA text mode 80x25.
pub const BUFFER_WIDTH: usize = 80;
