pub mod analysis;
pub mod audio;
pub mod chord;
pub mod job;
pub mod request;
