// Platform API surface.
// - `PlatformApi` is the seam between the orchestration logic and the
//   network: the binary uses the blocking HTTP `client::PlatformClient`,
//   tests use the scripted `mock::MockPlatform`.
// - The types here mirror the JSON shapes the platform returns.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::Result;

pub mod client;
pub mod mock;

macro_rules! platform_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                s.trim().parse().map($name)
            }
        }
    };
}

platform_id!(
    /// Organizational client on the platform.
    ClientId
);
platform_id!(
    /// Network within a client.
    NetworkId
);
platform_id!(AssessmentId);
platform_id!(
    /// Upload container created for one scan file.
    UploadId
);

/// A client visible to the API key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSummary {
    pub id: ClientId,
    pub name: String,
}

/// A network inside a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSummary {
    pub id: NetworkId,
    pub name: String,
    pub client_id: ClientId,
}

/// Payload for the assessment every upload of a run is attached to.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAssessment {
    pub name: String,
    pub start_date: String,
    pub notes: String,
}

/// Where the uploads of a run land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadTarget {
    pub client_id: ClientId,
    pub network_id: NetworkId,
    pub assessment_id: AssessmentId,
}

/// Processing state of an upload as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteState {
    /// Created but processing was never started.
    Uploading,
    /// Still queued or being parsed; carries the raw state for logging.
    Processing(String),
    Complete,
    Failed(String),
}

impl RemoteState {
    /// Map the platform's `state` field.
    pub fn from_platform(state: &str) -> Self {
        match state.to_ascii_uppercase().as_str() {
            "UPLOADING" => RemoteState::Uploading,
            "COMPLETE" => RemoteState::Complete,
            "ERROR" | "FAILED" => RemoteState::Failed(format!("platform reported state {}", state)),
            _ => RemoteState::Processing(state.to_string()),
        }
    }
}

impl fmt::Display for RemoteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteState::Uploading => f.write_str("UPLOADING"),
            RemoteState::Processing(state) => f.write_str(state),
            RemoteState::Complete => f.write_str("COMPLETE"),
            RemoteState::Failed(reason) => f.write_str(reason),
        }
    }
}

/// Operations the uploader needs from the platform.
///
/// Every method attaches the API key; implementations map HTTP failures to
/// [`crate::error::UploadError`] kinds so callers can decide between
/// retrying, failing a file and aborting the run.
///
/// Ingesting a file takes three calls: [`create_upload`], [`attach_file`]
/// and [`start_processing`]. None of them is idempotent, which is why each
/// has a matching lookup ([`find_upload`], [`attached_files`],
/// [`get_file_status`]) to check whether an earlier try already took effect.
///
/// [`create_upload`]: PlatformApi::create_upload
/// [`attach_file`]: PlatformApi::attach_file
/// [`start_processing`]: PlatformApi::start_processing
/// [`find_upload`]: PlatformApi::find_upload
/// [`attached_files`]: PlatformApi::attached_files
/// [`get_file_status`]: PlatformApi::get_file_status
pub trait PlatformApi {
    /// List every client visible to the API key. Doubles as the
    /// authentication check, so a bad key fails here first.
    fn authenticate_and_list_clients(&self) -> Result<Vec<ClientSummary>>;

    /// List the networks of a client.
    fn list_networks(&self, client_id: ClientId) -> Result<Vec<NetworkSummary>>;

    fn create_assessment(&self, client_id: ClientId, assessment: &NewAssessment) -> Result<AssessmentId>;

    /// Create an empty upload named `upload_name` in the target assessment.
    fn create_upload(&self, target: &UploadTarget, upload_name: &str) -> Result<UploadId>;

    /// Look up an upload created earlier in this run by its name.
    fn find_upload(&self, target: &UploadTarget, upload_name: &str) -> Result<Option<UploadId>>;

    /// Attach a scan file to an upload.
    fn attach_file(&self, client_id: ClientId, upload_id: UploadId, path: &Path) -> Result<()>;

    /// Number of files attached to an upload.
    fn attached_files(&self, client_id: ClientId, upload_id: UploadId) -> Result<usize>;

    /// Start processing an upload. With `auto_urba` the platform runs URBA
    /// scoring once processing finishes.
    fn start_processing(&self, client_id: ClientId, upload_id: UploadId, auto_urba: bool) -> Result<()>;

    fn get_file_status(&self, client_id: ClientId, upload_id: UploadId) -> Result<RemoteState>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_state_mapping() {
        assert_eq!(RemoteState::from_platform("COMPLETE"), RemoteState::Complete);
        assert_eq!(RemoteState::from_platform("complete"), RemoteState::Complete);
        assert!(matches!(RemoteState::from_platform("ERROR"), RemoteState::Failed(_)));
        assert_eq!(RemoteState::from_platform("UPLOADING"), RemoteState::Uploading);
        assert_eq!(
            RemoteState::from_platform("PARSING"),
            RemoteState::Processing("PARSING".into())
        );
    }

    #[test]
    fn ids_parse_from_cli_strings() {
        assert_eq!(" 42 ".parse::<ClientId>().unwrap(), ClientId(42));
        assert!("abc".parse::<NetworkId>().is_err());
        assert_eq!(UploadId(7).to_string(), "7");
    }

    #[test]
    fn network_summary_reads_camel_case() {
        let net: NetworkSummary =
            serde_json::from_str(r#"{"id": 5, "name": "DMZ", "clientId": 9, "type": "IP"}"#).unwrap();
        assert_eq!(net.client_id, ClientId(9));
        assert_eq!(net.id, NetworkId(5));
    }
}
