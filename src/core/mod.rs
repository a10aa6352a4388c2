pub mod audio;
pub mod dsp;
pub mod engine;
pub mod separator;
pub mod text;
pub mod voice;
