//! jobgroup-sys: the kernel boundary for jobgroup
//!
//! Everything that touches the OS goes through the [`JobApi`] trait:
//! - [`NativeJobApi`]: Win32 job objects on Windows, an always-failing stand-in elsewhere
//! - `RecordingJobApi`: in-memory emulation for tests, behind the `testing` feature
//!
//! The OS structure layouts live only in the Windows backend; callers pass the
//! plain descriptors from `jobgroup-core`.

pub mod api;
pub mod handle;
pub mod native;
#[cfg(any(test, feature = "testing"))]
pub mod recording;

pub use api::{CreateProcessRequest, CreationFlags, JobApi, OsResult, ProcessInformation};
pub use handle::{Handle, OwnedHandle};
pub use native::NativeJobApi;
#[cfg(any(test, feature = "testing"))]
pub use recording::RecordingJobApi;
