//! In-process transport that hands calls straight to a [`Dispatcher`].

use sockroute_client::{Transport, TransportError};
use sockroute_protocol::{ApiError, CallData, ResponseData, API_EVENT};
use sockroute_server::Dispatcher;
use std::future::Future;
use std::sync::Arc;

/// Delivers calls to a dispatcher in the same process.
///
/// Calls on an event other than the one listened to are answered with a 404,
/// the same way the TCP server answers them.
#[derive(Clone)]
pub struct LocalTransport {
    dispatcher: Arc<Dispatcher>,
    event: String,
}

impl LocalTransport {
    pub fn new(dispatcher: impl Into<Arc<Dispatcher>>) -> Self {
        Self {
            dispatcher: dispatcher.into(),
            event: API_EVENT.to_string(),
        }
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = event.into();
        self
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }
}

impl Transport for LocalTransport {
    fn emit(
        &self,
        event: &str,
        call: CallData,
    ) -> impl Future<Output = Result<ResponseData, TransportError>> + Send {
        let dispatcher = self.dispatcher.clone();
        let listening = event == self.event;
        let event = event.to_string();

        async move {
            if !listening {
                tracing::debug!("No listener for event '{}'", event);
                return Ok(dispatcher.api_error(&ApiError::no_listener(&event)));
            }
            Ok(dispatcher.handle(&call).await)
        }
    }
}
