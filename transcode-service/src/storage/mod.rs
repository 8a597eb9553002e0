//! Blob storage port implementations

pub mod s3;

pub use s3::S3BlobStore;
