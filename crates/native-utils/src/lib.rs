//! Native audio plumbing: device selection, microphone capture, and the
//! sample-rate conversions between device rates and the wire rates.

pub mod audio;
pub mod capture;
pub mod device;
