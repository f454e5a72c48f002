mod process;
pub use process::{ProcessSpec, TtySpec, WindowSize};

mod signal;
pub use signal::Signal;
