// Library root
// ------------
// The binary (`main.rs`) wires these modules together for one batch run:
// configuration → scope resolution → per-file upload → archive.
//
// Module responsibilities:
// - `config` / `cli`: build the immutable run configuration from the TOML
//   file, command-line overrides and defaults.
// - `api`: the `PlatformApi` seam, its HTTP implementation and a scripted
//   in-process platform for tests.
// - `scope`: pick the client and network the run uploads into.
// - `upload`: discover files and drive each through upload, processing
//   and archival.
// - `archive`: collision-safe moves into the archive folder.
// - `retry`: bounded backoff and the clock used for waiting.
// - `ui`: operator prompts, progress bar and the end-of-run summary.
// - `logging`: console and log-file subscriber.
pub mod api;
pub mod archive;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod retry;
pub mod scope;
pub mod ui;
pub mod upload;

pub use error::{Result, UploadError};
