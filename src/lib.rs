pub mod config;
pub mod error;
pub mod events;
pub mod log;
pub mod playlist;
pub mod queue;
pub mod scan;
pub mod sinks;
pub mod store;
pub mod timer;
pub mod tasks {
    pub mod monitor;
    pub mod slideshow;
}

pub use error::Error;
