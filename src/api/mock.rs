// Scripted in-process platform for tests.
// - Scope listings are built up front.
// - Each upload step (create, attach, start) and each status poll follows a
//   per-file script, keyed by the scan file's name; upload names end with
//   `-<file name>`, which is how create/start/status calls find their script.
// - Everything that reached the "platform" is recorded for assertions.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::{
    AssessmentId, ClientId, ClientSummary, NetworkId, NetworkSummary, NewAssessment, PlatformApi,
    RemoteState, UploadId, UploadTarget,
};
use crate::error::{Result, UploadError};

/// Failure a script can inject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Transient,
    Auth,
    Request(u16),
    Protocol,
}

impl Failure {
    fn to_error(self) -> UploadError {
        match self {
            Failure::Transient => UploadError::Transient("HTTP 503: scripted".into()),
            Failure::Auth => UploadError::Auth {
                status: 401,
                body: "scripted".into(),
            },
            Failure::Request(status) => UploadError::Request {
                status,
                body: "scripted".into(),
            },
            Failure::Protocol => UploadError::Protocol("scripted malformed body".into()),
        }
    }
}

/// An upload as the mock platform holds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedUpload {
    pub id: UploadId,
    pub name: String,
    pub target: UploadTarget,
    /// Names of the attached files, in attach order.
    pub files: Vec<String>,
    pub started: bool,
    pub auto_urba: bool,
}

type Scripts = HashMap<String, VecDeque<Failure>>;

#[derive(Default)]
struct State {
    clients: Vec<ClientSummary>,
    networks: HashMap<ClientId, Vec<NetworkSummary>>,
    reject_key: bool,
    client_listing_failures: VecDeque<Failure>,
    /// Create failures returned before the upload exists.
    create_failures: Scripts,
    /// Create failures returned after the upload was recorded.
    create_landed_failures: Scripts,
    attach_failures: Scripts,
    attach_landed_failures: Scripts,
    start_failures: Scripts,
    status_failures: Scripts,
    /// Remote states per file once started; the last one repeats.
    states: HashMap<String, VecDeque<RemoteState>>,
    urba_failure: Option<Failure>,
    uploads: Vec<RecordedUpload>,
    assessments: Vec<(ClientId, NewAssessment)>,
    create_calls: usize,
    attach_calls: usize,
    start_calls: usize,
    status_calls: usize,
    urba_requests: Vec<UploadId>,
    next_id: u64,
}

/// [`PlatformApi`] implementation driven by scripts.
#[derive(Default)]
pub struct MockPlatform {
    state: Mutex<State>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn configure(self, f: impl FnOnce(&mut State)) -> Self {
        f(&mut self.state());
        self
    }

    fn script(self, pick: fn(&mut State) -> &mut Scripts, file_name: &str, failures: &[Failure]) -> Self {
        self.configure(|s| {
            pick(s)
                .entry(file_name.into())
                .or_default()
                .extend(failures.iter().copied());
        })
    }

    pub fn with_client(self, id: u64, name: &str) -> Self {
        self.configure(|s| {
            s.clients.push(ClientSummary {
                id: ClientId(id),
                name: name.into(),
            });
        })
    }

    pub fn with_network(self, client: u64, id: u64, name: &str) -> Self {
        self.with_foreign_network(client, id, client, name)
    }

    /// A network returned in `listed_under`'s search that actually belongs to
    /// `owner`.
    pub fn with_foreign_network(self, listed_under: u64, id: u64, owner: u64, name: &str) -> Self {
        self.configure(|s| {
            s.networks
                .entry(ClientId(listed_under))
                .or_default()
                .push(NetworkSummary {
                    id: NetworkId(id),
                    name: name.into(),
                    client_id: ClientId(owner),
                });
        })
    }

    /// Every call answers 401.
    pub fn rejecting_key(self) -> Self {
        self.configure(|s| s.reject_key = true)
    }

    /// The next client listing fails once with `failure`.
    pub fn failing_client_listing(self, failure: Failure) -> Self {
        self.configure(|s| s.client_listing_failures.push_back(failure))
    }

    /// Creating the upload for `file_name` fails with `failures`, in order,
    /// before one is accepted.
    pub fn failing_upload(self, file_name: &str, failures: &[Failure]) -> Self {
        self.script(|s| &mut s.create_failures, file_name, failures)
    }

    /// The upload for `file_name` is created but the caller sees `failure`,
    /// as when a response is lost after the platform accepted the request.
    pub fn upload_lands_then_fails(self, file_name: &str, failure: Failure) -> Self {
        self.script(|s| &mut s.create_landed_failures, file_name, &[failure])
    }

    /// Attaching `file_name` fails with `failures` before the file lands.
    pub fn failing_attach(self, file_name: &str, failures: &[Failure]) -> Self {
        self.script(|s| &mut s.attach_failures, file_name, failures)
    }

    /// `file_name` is attached but the caller sees `failure`.
    pub fn attach_lands_then_fails(self, file_name: &str, failure: Failure) -> Self {
        self.script(|s| &mut s.attach_landed_failures, file_name, &[failure])
    }

    /// Starting processing for `file_name` fails with `failures` before the
    /// platform starts.
    pub fn failing_start(self, file_name: &str, failures: &[Failure]) -> Self {
        self.script(|s| &mut s.start_failures, file_name, failures)
    }

    /// Remote states reported for `file_name` once started; the last one
    /// repeats. Files without a script complete on the first poll.
    pub fn with_states(self, file_name: &str, states: &[RemoteState]) -> Self {
        self.configure(|s| {
            s.states.insert(file_name.into(), states.iter().cloned().collect());
        })
    }

    pub fn failing_status(self, file_name: &str, failures: &[Failure]) -> Self {
        self.script(|s| &mut s.status_failures, file_name, failures)
    }

    /// Every start that asks for URBA fails with `failure`.
    pub fn failing_urba(self, failure: Failure) -> Self {
        self.configure(|s| s.urba_failure = Some(failure))
    }

    /// Uploads the platform has recorded, in creation order.
    pub fn uploads(&self) -> Vec<RecordedUpload> {
        self.state().uploads.clone()
    }

    /// Number of `create_upload` calls, including failed ones.
    pub fn upload_calls(&self) -> usize {
        self.state().create_calls
    }

    pub fn attach_calls(&self) -> usize {
        self.state().attach_calls
    }

    pub fn start_calls(&self) -> usize {
        self.state().start_calls
    }

    pub fn status_calls(&self) -> usize {
        self.state().status_calls
    }

    /// Uploads for which a start asked for URBA, including refused starts.
    pub fn urba_requests(&self) -> Vec<UploadId> {
        self.state().urba_requests.clone()
    }

    pub fn assessments(&self) -> Vec<(ClientId, NewAssessment)> {
        self.state().assessments.clone()
    }

    fn check_key(state: &State) -> Result<()> {
        if state.reject_key {
            Err(Failure::Auth.to_error())
        } else {
            Ok(())
        }
    }
}

/// Whether the upload named `upload_name` carries the script for `file_name`.
fn belongs_to(upload_name: &str, file_name: &str) -> bool {
    upload_name == file_name || upload_name.ends_with(&format!("-{}", file_name))
}

fn pop(scripts: &mut Scripts, upload_name: &str) -> Option<Failure> {
    scripts
        .iter_mut()
        .find(|(file, _)| belongs_to(upload_name, file))
        .and_then(|(_, queue)| queue.pop_front())
}

fn not_found(upload_id: UploadId) -> UploadError {
    UploadError::Request {
        status: 404,
        body: format!("upload {} not found", upload_id),
    }
}

impl State {
    fn upload_mut(&mut self, upload_id: UploadId) -> Result<&mut RecordedUpload> {
        self.uploads
            .iter_mut()
            .find(|u| u.id == upload_id)
            .ok_or_else(|| not_found(upload_id))
    }

    fn upload_name(&self, upload_id: UploadId) -> Result<String> {
        self.uploads
            .iter()
            .find(|u| u.id == upload_id)
            .map(|u| u.name.clone())
            .ok_or_else(|| not_found(upload_id))
    }
}

impl PlatformApi for MockPlatform {
    fn authenticate_and_list_clients(&self) -> Result<Vec<ClientSummary>> {
        let mut state = self.state();
        Self::check_key(&state)?;
        if let Some(failure) = state.client_listing_failures.pop_front() {
            return Err(failure.to_error());
        }
        Ok(state.clients.clone())
    }

    fn list_networks(&self, client_id: ClientId) -> Result<Vec<NetworkSummary>> {
        let state = self.state();
        Self::check_key(&state)?;
        Ok(state.networks.get(&client_id).cloned().unwrap_or_default())
    }

    fn create_assessment(&self, client_id: ClientId, assessment: &NewAssessment) -> Result<AssessmentId> {
        let mut state = self.state();
        Self::check_key(&state)?;
        state.assessments.push((client_id, assessment.clone()));
        state.next_id += 1;
        Ok(AssessmentId(state.next_id))
    }

    fn create_upload(&self, target: &UploadTarget, upload_name: &str) -> Result<UploadId> {
        let mut state = self.state();
        state.create_calls += 1;
        Self::check_key(&state)?;

        if let Some(failure) = pop(&mut state.create_failures, upload_name) {
            return Err(failure.to_error());
        }

        state.next_id += 1;
        let id = UploadId(state.next_id);
        state.uploads.push(RecordedUpload {
            id,
            name: upload_name.into(),
            target: *target,
            files: Vec::new(),
            started: false,
            auto_urba: false,
        });

        if let Some(failure) = pop(&mut state.create_landed_failures, upload_name) {
            return Err(failure.to_error());
        }
        Ok(id)
    }

    fn find_upload(&self, target: &UploadTarget, upload_name: &str) -> Result<Option<UploadId>> {
        let state = self.state();
        Self::check_key(&state)?;
        Ok(state
            .uploads
            .iter()
            .find(|u| u.name == upload_name && u.target.assessment_id == target.assessment_id)
            .map(|u| u.id))
    }

    fn attach_file(&self, _client_id: ClientId, upload_id: UploadId, path: &Path) -> Result<()> {
        let mut state = self.state();
        state.attach_calls += 1;
        Self::check_key(&state)?;

        if !path.is_file() {
            return Err(UploadError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "scan file missing"),
            ));
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        state.upload_mut(upload_id)?;

        if let Some(failure) = pop(&mut state.attach_failures, &file_name) {
            return Err(failure.to_error());
        }
        state.upload_mut(upload_id)?.files.push(file_name.clone());
        if let Some(failure) = pop(&mut state.attach_landed_failures, &file_name) {
            return Err(failure.to_error());
        }
        Ok(())
    }

    fn attached_files(&self, _client_id: ClientId, upload_id: UploadId) -> Result<usize> {
        let mut state = self.state();
        Self::check_key(&state)?;
        Ok(state.upload_mut(upload_id)?.files.len())
    }

    fn start_processing(&self, _client_id: ClientId, upload_id: UploadId, auto_urba: bool) -> Result<()> {
        let mut state = self.state();
        state.start_calls += 1;
        Self::check_key(&state)?;

        let name = state.upload_name(upload_id)?;
        if auto_urba {
            state.urba_requests.push(upload_id);
            if let Some(failure) = state.urba_failure {
                return Err(failure.to_error());
            }
        }
        if let Some(failure) = pop(&mut state.start_failures, &name) {
            return Err(failure.to_error());
        }

        let upload = state.upload_mut(upload_id)?;
        if upload.files.is_empty() {
            return Err(UploadError::Request {
                status: 400,
                body: "upload has no files".into(),
            });
        }
        upload.started = true;
        upload.auto_urba = auto_urba;
        Ok(())
    }

    fn get_file_status(&self, _client_id: ClientId, upload_id: UploadId) -> Result<RemoteState> {
        let mut state = self.state();
        state.status_calls += 1;
        Self::check_key(&state)?;

        let name = state.upload_name(upload_id)?;
        if let Some(failure) = pop(&mut state.status_failures, &name) {
            return Err(failure.to_error());
        }
        if !state.upload_mut(upload_id)?.started {
            return Ok(RemoteState::Uploading);
        }

        let script = state
            .states
            .iter_mut()
            .find(|(file, _)| belongs_to(&name, file))
            .map(|(_, queue)| queue);
        Ok(match script {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(RemoteState::Complete),
            Some(queue) => queue.front().cloned().unwrap_or(RemoteState::Complete),
            None => RemoteState::Complete,
        })
    }
}
