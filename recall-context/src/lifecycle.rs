//! Per-request state machine of the generation coordinator.

use recall_primitives::RequestId;
use thiserror::Error;
use tracing::debug;

/// States a generation request moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Request accepted and validated.
    Received,
    /// Context was retrieved from the embedding store.
    ContextRetrieved,
    /// Retrieval was bypassed or degraded; no context will be used.
    ContextSkipped,
    /// The oracle request, including any context, has been built.
    PromptAssembled,
    /// The oracle call is in flight.
    Dispatched,
    /// The oracle answered and the response has been assembled.
    ResponseFormatted,
    /// The response was handed back to the caller.
    Completed,
    /// The request failed at some stage.
    Failed,
}

impl RequestState {
    /// Returns `true` once the request can no longer change state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Events that drive [`RequestLifecycle`] transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestEvent {
    /// Retrieval produced a context set.
    Retrieve,
    /// Retrieval was disabled or failed softly.
    Skip,
    /// The oracle request was built.
    Assemble,
    /// The oracle call started.
    Dispatch,
    /// The oracle answered.
    Format,
    /// The response was returned.
    Complete,
    /// Abort the request.
    Fail,
}

/// Tracks the state of one request.
#[derive(Debug, Clone, Copy)]
pub struct RequestLifecycle {
    request_id: RequestId,
    state: RequestState,
}

impl RequestLifecycle {
    /// Starts a lifecycle in [`RequestState::Received`].
    #[must_use]
    pub const fn new(request_id: RequestId) -> Self {
        Self {
            request_id,
            state: RequestState::Received,
        }
    }

    /// Identifier of the tracked request.
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> RequestState {
        self.state
    }

    /// Applies an event, returning the resulting state.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidTransition`] when the event is not
    /// allowed from the current state.
    pub fn transition(&mut self, event: RequestEvent) -> LifecycleResult<RequestState> {
        let next = match (self.state, event) {
            (RequestState::Received, RequestEvent::Retrieve) => Some(RequestState::ContextRetrieved),
            (RequestState::Received, RequestEvent::Skip) => Some(RequestState::ContextSkipped),
            (RequestState::ContextRetrieved | RequestState::ContextSkipped, RequestEvent::Assemble) => {
                Some(RequestState::PromptAssembled)
            }
            (RequestState::PromptAssembled, RequestEvent::Dispatch) => Some(RequestState::Dispatched),
            (RequestState::Dispatched, RequestEvent::Format) => Some(RequestState::ResponseFormatted),
            (RequestState::ResponseFormatted, RequestEvent::Complete) => Some(RequestState::Completed),
            (state, RequestEvent::Fail) if !state.is_terminal() => Some(RequestState::Failed),
            (RequestState::Failed, RequestEvent::Fail) => Some(RequestState::Failed),
            _ => None,
        };

        let Some(next_state) = next else {
            return Err(LifecycleError::InvalidTransition {
                request_id: self.request_id,
                from: self.state,
                event,
            });
        };

        if next_state != self.state {
            debug!(
                request_id = %self.request_id,
                ?self.state,
                ?next_state,
                ?event,
                "request state transition"
            );
            self.state = next_state;
        }

        Ok(self.state)
    }
}

/// Errors emitted by the request state machine.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Transition was not permitted from the current state.
    #[error("invalid request transition from {from:?} via {event:?} for request {request_id}")]
    InvalidTransition {
        /// Request whose transition failed.
        request_id: RequestId,
        /// State prior to the attempted transition.
        from: RequestState,
        /// Event that triggered the failure.
        event: RequestEvent,
    },
}

/// Result alias used for lifecycle operations.
pub type LifecycleResult<T> = Result<T, LifecycleError>;
