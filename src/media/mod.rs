pub mod encoder;
pub mod ffmpeg;
pub mod layout;
pub mod mimetype;
