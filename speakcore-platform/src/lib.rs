pub mod inject;
pub mod test;

#[cfg(windows)]
#[path = "windows.rs"]
pub mod windows;

#[cfg(target_os = "macos")]
#[path = "macos.rs"]
pub mod macos;

#[cfg(windows)]
pub use windows::{WindowsContextProvider, WindowsInserter};

#[cfg(target_os = "macos")]
pub use macos::{MacosContextProvider, MacosInserter};
