//! Process-level plumbing shared by the library and the `voxguide` binary.

pub mod logging;
