pub mod detector;

pub use detector::SpreadDetector;
