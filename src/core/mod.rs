pub mod fingerprint;
pub mod grouping;
pub mod hash;
pub mod image;
pub mod scoring;
