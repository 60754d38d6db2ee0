//! Columnar Data
//!
//! Compressed, row-range chunks of numeric columns.
//!
//! ## Components
//! - **`chunk`**: the closed family of chunk encodings and their byte format.
//! - **`new_chunk`**: staging buffers and the narrowest-lossless encoding choice.
//! - **`column`**: a logical column spread over the cluster, one chunk per key.
//! - **`frame`**: named columns sharing a chunk layout.

pub mod chunk;
pub mod column;
pub mod frame;
pub mod new_chunk;
