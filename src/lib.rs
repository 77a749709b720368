//! Client-side engine for S3-compatible object storage.
//!
//! Signs requests (V4 or legacy V2), retries transient failures, reads objects
//! through a seekable cursor, runs resumable multipart uploads with a bounded
//! number of parts in flight, and builds presigned URLs.
//!
//! ## Quick start
//!
//! ```no_run
//! # async fn demo() -> Result<(), s3io::Error> {
//! use std::io::SeekFrom;
//! use s3io::{Auth, Client};
//!
//! let client = Client::builder("https://s3.example.com")?
//!     .region("us-east-1")
//!     .auth(Auth::from_env()?)
//!     .build()?;
//!
//! let mut reader = client.open("my-bucket", "path/to/object.bin");
//! reader.seek(SeekFrom::End(-16)).await?;
//! let mut tail = [0u8; 16];
//! let n = reader.read(&mut tail).await?;
//! println!("last {n} bytes: {:?}", &tail[..n]);
//!
//! let out = client
//!     .objects()
//!     .upload("my-bucket", "big.bin")
//!     .send_bytes(vec![0u8; 12 * 1024 * 1024])
//!     .await?;
//! println!("stored {} bytes in {} parts", out.size, out.parts);
//! # Ok(())
//! # }
//! ```
//!
//! ## Presigning
//!
//! ```no_run
//! # fn demo(client: &s3io::Client) -> Result<(), s3io::Error> {
//! use std::time::Duration;
//!
//! let req = client
//!     .objects()
//!     .presign_get("my-bucket", "report.pdf")
//!     .expires_in(Duration::from_secs(600))
//!     .query_param("response-content-disposition", "attachment")
//!     .build()?;
//! println!("{}", req.url);
//! # Ok(())
//! # }
//! ```

#[cfg(all(
    feature = "rustls",
    feature = "native-tls",
    not(feature = "allow-both-tls")
))]
compile_error!("Enable only one of: rustls, native-tls.");

/// Service entry points and request builders.
pub mod api;
/// Multipart upload planning and coordination.
pub mod multipart;
/// Seekable object reads.
pub mod reader;
/// Shared request/response types.
pub mod types;

mod auth;
mod client;
mod error;
mod signing;
mod transport;
mod util;

pub use auth::{AddressingStyle, Auth, Credentials, Region, SignatureVersion};
pub use client::{Client, ClientBuilder};
pub use error::{Error, Result};
pub use multipart::{UploadCoordinator, UploadOptions, UploadSession, UploadState};
pub use reader::ObjectReader;
