//! The backend for the current target

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use self::windows::WindowsJobApi;

#[cfg(not(windows))]
mod unsupported;
#[cfg(not(windows))]
pub use self::unsupported::UnsupportedJobApi;

/// Backend used when no other is chosen
#[cfg(windows)]
pub type NativeJobApi = WindowsJobApi;

/// Backend used when no other is chosen
#[cfg(not(windows))]
pub type NativeJobApi = UnsupportedJobApi;
