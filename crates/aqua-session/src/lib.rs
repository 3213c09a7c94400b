//! Search session, selection and booking state machines behind the worker
//! search screen.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use aqua_core::{
    BookingLocation, FilterCriteria, OrderRequest, SearchQuery, WorkerId, WorkerProfile,
};
use aqua_storage::{BackoffPolicy, DirectoryError, HttpClientConfig, OrderReceipt, WorkerDirectory};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const SEARCH_ERROR_TITLE: &str = "Search Error";
pub const SEARCH_ERROR_MESSAGE: &str = "Failed to search for workers. Please try again.";
pub const MISSING_INFO_TITLE: &str = "Missing Information";
pub const MISSING_DETAILS_MESSAGE: &str = "Please provide a title and description for your booking.";
pub const MISSING_LOCATION_MESSAGE: &str =
    "Please provide the address, city and state for your booking.";
pub const BOOKED_TITLE: &str = "Booking Successful";
pub const BROKER_BOOKED_MESSAGE: &str =
    "The broker has been notified and will assign the worker to your task.";
pub const WORKER_BOOKED_MESSAGE: &str = "The worker has been notified and will contact you soon.";
pub const BOOKING_ERROR_TITLE: &str = "Booking Error";
pub const BOOKING_ERROR_MESSAGE: &str = "Failed to book the worker. Please try again.";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub search_retries: usize,
    pub state_dir: PathBuf,
    pub log_filter: String,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            api_url: lookup("AQUA_API_URL").unwrap_or_else(|| "http://localhost:5000".to_string()),
            user_agent: lookup("AQUA_USER_AGENT").unwrap_or_else(|| "aqua-client/0.1".to_string()),
            http_timeout_secs: lookup("AQUA_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            search_retries: lookup("AQUA_SEARCH_RETRIES")
                .and_then(|v| v.parse().ok())
                .unwrap_or(2),
            state_dir: lookup("AQUA_STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./.aqua")),
            log_filter: lookup("AQUA_LOG").unwrap_or_else(|| "info".to_string()),
        }
    }

    pub fn http_client_config(&self, bearer_token: Option<String>) -> HttpClientConfig {
        HttpClientConfig {
            base_url: self.api_url.clone(),
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            backoff: BackoffPolicy {
                max_retries: self.search_retries,
                ..Default::default()
            },
            bearer_token,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Success,
    Error,
}

/// A user-visible outcome, queued until the presentation layer drains it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub description: String,
    pub raised_at: DateTime<Utc>,
}

impl Notice {
    pub fn success(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            title: title.into(),
            description: description.into(),
            raised_at: Utc::now(),
        }
    }

    pub fn error(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            title: title.into(),
            description: description.into(),
            raised_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SearchPhase {
    #[default]
    Idle,
    Searching {
        generation: u64,
        query: SearchQuery,
    },
}

/// Handle for one started search attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchTicket {
    generation: u64,
    query: SearchQuery,
}

impl SearchTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn query(&self) -> &SearchQuery {
        &self.query
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Started(SearchTicket),
    /// Same query as the attempt already in flight; no new fetch.
    Coalesced { generation: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    Succeeded { generation: u64, count: usize },
    Failed { generation: u64, error: String },
    Superseded { generation: u64, latest: u64 },
    Coalesced { generation: u64 },
}

/// Manual-trigger search lifecycle. Only the most recently triggered attempt
/// may change the results.
#[derive(Debug, Default)]
pub struct SearchSession {
    phase: SearchPhase,
    latest_generation: u64,
    results: Vec<WorkerProfile>,
}

impl SearchSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> &SearchPhase {
        &self.phase
    }

    pub fn is_searching(&self) -> bool {
        matches!(self.phase, SearchPhase::Searching { .. })
    }

    pub fn results(&self) -> &[WorkerProfile] {
        &self.results
    }

    pub fn find(&self, id: &WorkerId) -> Option<&WorkerProfile> {
        self.results.iter().find(|w| &w.id == id)
    }

    pub fn trigger(&mut self, criteria: &FilterCriteria) -> Trigger {
        let query = criteria.to_query();
        if let SearchPhase::Searching {
            generation,
            query: in_flight,
        } = &self.phase
        {
            if *in_flight == query {
                debug!(generation, %query, "coalescing search trigger");
                return Trigger::Coalesced {
                    generation: *generation,
                };
            }
        }

        self.latest_generation += 1;
        let generation = self.latest_generation;
        info!(generation, %query, "search triggered");
        self.phase = SearchPhase::Searching {
            generation,
            query: query.clone(),
        };
        Trigger::Started(SearchTicket { generation, query })
    }

    /// Returns to `Idle` when the attempt behind `ticket` was dropped before
    /// its response arrived. A no-op once a newer trigger owns the phase.
    pub fn abandon(&mut self, ticket: &SearchTicket) -> bool {
        match &self.phase {
            SearchPhase::Searching { generation, .. } if *generation == ticket.generation => {
                debug!(generation, "search abandoned before its response");
                self.phase = SearchPhase::Idle;
                true
            }
            _ => false,
        }
    }

    /// Applies a response if it belongs to the latest trigger; anything older
    /// is dropped. Failures keep the previous results.
    pub fn resolve(
        &mut self,
        ticket: &SearchTicket,
        result: Result<Vec<WorkerProfile>, DirectoryError>,
    ) -> SearchOutcome {
        if ticket.generation != self.latest_generation {
            debug!(
                generation = ticket.generation,
                latest = self.latest_generation,
                "discarding superseded search response"
            );
            return SearchOutcome::Superseded {
                generation: ticket.generation,
                latest: self.latest_generation,
            };
        }

        self.phase = SearchPhase::Idle;
        match result {
            Ok(workers) => {
                let count = workers.len();
                self.results = workers;
                info!(generation = ticket.generation, count, "search succeeded");
                SearchOutcome::Succeeded {
                    generation: ticket.generation,
                    count,
                }
            }
            Err(err) => {
                warn!(generation = ticket.generation, error = %err, "search failed");
                SearchOutcome::Failed {
                    generation: ticket.generation,
                    error: err.to_string(),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingField {
    Title,
    Description,
    Address,
    City,
    State,
}

impl BookingField {
    pub fn as_str(self) -> &'static str {
        match self {
            BookingField::Title => "title",
            BookingField::Description => "description",
            BookingField::Address => "address",
            BookingField::City => "city",
            BookingField::State => "state",
        }
    }

    fn missing_message(self) -> &'static str {
        match self {
            BookingField::Title | BookingField::Description => MISSING_DETAILS_MESSAGE,
            BookingField::Address | BookingField::City | BookingField::State => {
                MISSING_LOCATION_MESSAGE
            }
        }
    }
}

impl fmt::Display for BookingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("no worker is selected")]
    NoSelection,
    #[error("missing information: {0} is required")]
    MissingInformation(BookingField),
    #[error("a booking for worker {0} is already being submitted")]
    SubmissionInFlight(WorkerId),
    #[error("booking failed: {0}")]
    Network(#[from] DirectoryError),
}

/// Form state for booking the selected worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingDraft {
    worker_id: WorkerId,
    broker_id: Option<String>,
    title: String,
    description: String,
    location: BookingLocation,
}

impl BookingDraft {
    pub fn for_worker(worker: &WorkerProfile) -> Self {
        Self {
            worker_id: worker.id.clone(),
            broker_id: worker.broker_id.clone(),
            title: String::new(),
            description: String::new(),
            location: BookingLocation::default(),
        }
    }

    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    pub fn broker_id(&self) -> Option<&str> {
        self.broker_id.as_deref()
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn location(&self) -> &BookingLocation {
        &self.location
    }

    pub fn update_field(&mut self, field: BookingField, value: impl Into<String>) {
        let value = value.into();
        match field {
            BookingField::Title => self.title = value,
            BookingField::Description => self.description = value,
            BookingField::Address => self.location.address = value,
            BookingField::City => self.location.city = value,
            BookingField::State => self.location.state = value,
        }
    }

    /// Presence checks in submission order; whitespace counts as empty.
    pub fn validate(&self) -> Result<(), BookingError> {
        let checks = [
            (BookingField::Title, &self.title),
            (BookingField::Description, &self.description),
            (BookingField::Address, &self.location.address),
            (BookingField::City, &self.location.city),
            (BookingField::State, &self.location.state),
        ];
        match checks.iter().find(|(_, value)| value.trim().is_empty()) {
            Some((field, _)) => Err(BookingError::MissingInformation(*field)),
            None => Ok(()),
        }
    }

    pub fn to_order(&self, category: &str) -> Result<OrderRequest, BookingError> {
        self.validate()?;
        Ok(OrderRequest {
            worker_id: self.worker_id.clone(),
            broker_id: self.broker_id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            category: category.to_string(),
            location: self.location.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionChange {
    Selected,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("worker {0} is not in the current results")]
    NotInResults(WorkerId),
}

/// At most one selected worker, together with the draft bound to it. The
/// draft exists exactly when a worker is selected.
#[derive(Debug, Default)]
pub struct SelectionController {
    current: Option<BookingDraft>,
}

impl SelectionController {
    pub fn selected(&self) -> Option<&WorkerId> {
        self.current.as_ref().map(BookingDraft::worker_id)
    }

    pub fn draft(&self) -> Option<&BookingDraft> {
        self.current.as_ref()
    }

    pub fn draft_mut(&mut self) -> Option<&mut BookingDraft> {
        self.current.as_mut()
    }

    pub fn select(
        &mut self,
        id: &WorkerId,
        results: &[WorkerProfile],
    ) -> Result<SelectionChange, SelectionError> {
        let worker = results
            .iter()
            .find(|w| &w.id == id)
            .ok_or_else(|| SelectionError::NotInResults(id.clone()))?;
        if self.selected() == Some(id) {
            return Ok(SelectionChange::Unchanged);
        }
        self.current = Some(BookingDraft::for_worker(worker));
        Ok(SelectionChange::Selected)
    }

    /// Drops the selection and its draft.
    pub fn clear(&mut self) -> Option<BookingDraft> {
        self.current.take()
    }

    /// Clears the selection if its worker is missing from `results`. Returns
    /// whether anything was cleared.
    pub fn revalidate(&mut self, results: &[WorkerProfile]) -> bool {
        let Some(selected) = self.selected() else {
            return false;
        };
        if results.iter().any(|w| &w.id == selected) {
            return false;
        }
        self.current = None;
        true
    }
}

/// Order prepared from a validated draft, waiting for the network call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingTicket {
    order: OrderRequest,
}

impl BookingTicket {
    pub fn order(&self) -> &OrderRequest {
        &self.order
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingConfirmation {
    pub worker_id: WorkerId,
    pub broker_managed: bool,
    pub order_id: Option<String>,
    pub message: &'static str,
}

/// In-flight guard for booking submissions.
#[derive(Debug, Default)]
pub struct BookingSubmitter {
    in_flight: Option<WorkerId>,
}

impl BookingSubmitter {
    pub fn is_submitting(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn begin(
        &mut self,
        draft: &BookingDraft,
        category: &str,
    ) -> Result<BookingTicket, BookingError> {
        if let Some(worker_id) = &self.in_flight {
            return Err(BookingError::SubmissionInFlight(worker_id.clone()));
        }
        let order = draft.to_order(category)?;
        self.in_flight = Some(order.worker_id.clone());
        Ok(BookingTicket { order })
    }

    /// Releases the guard for a submission whose request was dropped
    /// unfinished. The order may still have reached the marketplace.
    pub fn abandon(&mut self, ticket: &BookingTicket) -> bool {
        if self.in_flight.as_ref() != Some(&ticket.order.worker_id) {
            return false;
        }
        warn!(worker_id = %ticket.order.worker_id, "booking abandoned before a response");
        self.in_flight = None;
        true
    }

    pub fn finish(
        &mut self,
        ticket: BookingTicket,
        result: Result<OrderReceipt, DirectoryError>,
    ) -> Result<BookingConfirmation, BookingError> {
        self.in_flight = None;
        let receipt = result?;
        let broker_managed = ticket.order.broker_id.is_some();
        Ok(BookingConfirmation {
            worker_id: ticket.order.worker_id,
            broker_managed,
            order_id: receipt.order_id().map(ToString::to_string),
            message: if broker_managed {
                BROKER_BOOKED_MESSAGE
            } else {
                WORKER_BOOKED_MESSAGE
            },
        })
    }
}

#[derive(Debug, Default)]
struct ScreenState {
    criteria: FilterCriteria,
    session: SearchSession,
    selection: SelectionController,
    submitter: BookingSubmitter,
    notices: Vec<Notice>,
}

fn lock_state(state: &Mutex<ScreenState>) -> MutexGuard<'_, ScreenState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs `release` against the screen state if the awaiting future is dropped
/// before the network call returns.
struct ReleaseOnDrop<'a, F: FnOnce(&mut ScreenState)> {
    state: &'a Mutex<ScreenState>,
    release: Option<F>,
}

impl<'a, F: FnOnce(&mut ScreenState)> ReleaseOnDrop<'a, F> {
    fn new(state: &'a Mutex<ScreenState>, release: F) -> Self {
        Self {
            state,
            release: Some(release),
        }
    }

    fn disarm(mut self) {
        self.release = None;
    }
}

impl<F: FnOnce(&mut ScreenState)> Drop for ReleaseOnDrop<'_, F> {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release(&mut lock_state(self.state));
        }
    }
}

/// The worker search screen: filters, one search session, the selection with
/// its booking draft, and the notices raised along the way.
///
/// All state sits behind one lock that is never held across a directory
/// call, so searches and submissions interleave only at those two awaits.
/// Dropping either call mid-flight hands its slot back.
pub struct WorkerSearch<D> {
    directory: D,
    state: Mutex<ScreenState>,
}

impl<D: WorkerDirectory> WorkerSearch<D> {
    /// Creates the screen without fetching anything.
    pub fn new(directory: D) -> Self {
        Self {
            directory,
            state: Mutex::new(ScreenState::default()),
        }
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    fn state(&self) -> MutexGuard<'_, ScreenState> {
        lock_state(&self.state)
    }

    pub fn criteria(&self) -> FilterCriteria {
        self.state().criteria.clone()
    }

    pub fn edit_filters<R>(&self, edit: impl FnOnce(&mut FilterCriteria) -> R) -> R {
        edit(&mut self.state().criteria)
    }

    pub fn clear_filters(&self) {
        self.state().criteria.clear();
    }

    pub async fn search(&self) -> SearchOutcome {
        let ticket = {
            let mut guard = self.state();
            let state = &mut *guard;
            match state.session.trigger(&state.criteria) {
                Trigger::Started(ticket) => ticket,
                Trigger::Coalesced { generation } => {
                    return SearchOutcome::Coalesced { generation }
                }
            }
        };

        let pending = ReleaseOnDrop::new(&self.state, |state: &mut ScreenState| {
            state.session.abandon(&ticket);
        });
        let result = self.directory.search(ticket.query()).await;
        pending.disarm();

        let mut guard = self.state();
        let state = &mut *guard;
        let outcome = state.session.resolve(&ticket, result);
        match &outcome {
            SearchOutcome::Succeeded { .. } => {
                if state.selection.revalidate(state.session.results()) {
                    info!("selected worker left the results; selection cleared");
                }
            }
            SearchOutcome::Failed { .. } => {
                state
                    .notices
                    .push(Notice::error(SEARCH_ERROR_TITLE, SEARCH_ERROR_MESSAGE));
            }
            SearchOutcome::Superseded { .. } | SearchOutcome::Coalesced { .. } => {}
        }
        outcome
    }

    pub fn is_searching(&self) -> bool {
        self.state().session.is_searching()
    }

    pub fn results(&self) -> Vec<WorkerProfile> {
        self.state().session.results().to_vec()
    }

    pub fn select_worker(&self, id: &WorkerId) -> Result<SelectionChange, SelectionError> {
        let mut guard = self.state();
        let state = &mut *guard;
        let change = state.selection.select(id, state.session.results())?;
        if change == SelectionChange::Selected {
            debug!(worker_id = %id, "worker selected");
        }
        Ok(change)
    }

    pub fn selected(&self) -> Option<WorkerProfile> {
        let state = self.state();
        let id = state.selection.selected()?;
        state.session.find(id).cloned()
    }

    pub fn draft(&self) -> Option<BookingDraft> {
        self.state().selection.draft().cloned()
    }

    pub fn cancel_booking(&self) {
        if let Some(draft) = self.state().selection.clear() {
            debug!(worker_id = %draft.worker_id(), "booking cancelled");
        }
    }

    pub fn update_booking(
        &self,
        field: BookingField,
        value: impl Into<String>,
    ) -> Result<(), BookingError> {
        let mut state = self.state();
        let draft = state
            .selection
            .draft_mut()
            .ok_or(BookingError::NoSelection)?;
        draft.update_field(field, value);
        Ok(())
    }

    pub fn is_submitting(&self) -> bool {
        self.state().submitter.is_submitting()
    }

    pub async fn submit_booking(&self) -> Result<BookingConfirmation, BookingError> {
        let ticket = {
            let mut guard = self.state();
            let state = &mut *guard;
            let draft = state.selection.draft().ok_or(BookingError::NoSelection)?;
            match state
                .submitter
                .begin(draft, state.criteria.booking_category())
            {
                Ok(ticket) => ticket,
                Err(BookingError::MissingInformation(field)) => {
                    debug!(%field, "booking rejected before submission");
                    state
                        .notices
                        .push(Notice::error(MISSING_INFO_TITLE, field.missing_message()));
                    return Err(BookingError::MissingInformation(field));
                }
                Err(err) => return Err(err),
            }
        };

        let pending = ReleaseOnDrop::new(&self.state, |state: &mut ScreenState| {
            state.submitter.abandon(&ticket);
        });
        let result = self.directory.create_order(ticket.order()).await;
        pending.disarm();

        let mut state = self.state();
        let outcome = state.submitter.finish(ticket, result);
        match &outcome {
            Ok(confirmation) => {
                info!(
                    worker_id = %confirmation.worker_id,
                    order_id = confirmation.order_id.as_deref().unwrap_or("-"),
                    "booking submitted"
                );
                state.selection.clear();
                state
                    .notices
                    .push(Notice::success(BOOKED_TITLE, confirmation.message));
            }
            Err(err) => {
                warn!(error = %err, "booking failed; draft kept for retry");
                state
                    .notices
                    .push(Notice::error(BOOKING_ERROR_TITLE, BOOKING_ERROR_MESSAGE));
            }
        }
        outcome
    }

    pub fn take_notices(&self) -> Vec<Notice> {
        std::mem::take(&mut self.state().notices)
    }
}
