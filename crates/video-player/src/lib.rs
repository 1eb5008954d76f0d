pub mod audio;
pub mod config;
pub mod convert;
pub mod frame;
pub mod pipeline;
pub mod queue;
pub mod render;
pub mod source;
pub mod state;
pub mod status;
pub mod surface;
