//! HTTP layer of the BlobGate storage gateway.
//!
//! ```text
//! hyper connection
//!   └─ BlobHttpService            canonical-path redirect, x-request-id
//!        └─ Router<BoxedHandler>  method + host + path trie
//!             ├─ Status           GET /ready
//!             ├─ handle_upload    multipart part ─pipe─▶ Uploader
//!             └─ handle_download  Downloader ─BlobStream─▶ ResponseBody
//! ```
//!
//! Route patterns follow the form `[METHOD ][HOST]/[PATH]`, where path
//! segments are literals, `{name}` single-segment wildcards, a trailing
//! `{name...}` wildcard, or `{$}` to anchor the end of the path.
//!
//! # Examples
//!
//! ```
//! use blobgate_http::{Lookup, Router};
//! use http::Method;
//!
//! let mut router = Router::new();
//! router.register("GET /cloud-storage/files/{file}", "download").unwrap();
//!
//! match router.lookup(&Method::GET, "localhost", "/cloud-storage/files/abc") {
//!     Lookup::Found { handler, params, .. } => {
//!         assert_eq!(*handler, "download");
//!         assert_eq!(params.get("file"), Some("abc"));
//!     }
//!     _ => unreachable!(),
//! }
//! ```

pub mod body;
pub mod download;
pub mod handler;
pub mod multipart;
pub mod pattern;
pub mod router;
pub mod service;
pub mod status;
pub mod upload;

pub use body::ResponseBody;
pub use download::handle_download;
pub use handler::{BoxError, BoxedHandler, Handler, RequestBody, full_body};
pub use multipart::{Multipart, MultipartError, Part};
pub use pattern::{Pattern, PatternError, PatternErrorKind, Segment};
pub use router::{Lookup, PathParams, RouteError, Router};
pub use service::{BlobHttpService, SERVER_NAME, gateway_router};
pub use status::{INTERNAL_ERROR_MESSAGE, Status, internal_error};
pub use upload::handle_upload;
