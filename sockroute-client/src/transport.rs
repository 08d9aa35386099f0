//! Transport abstraction used by the endpoint facade.

use crate::error::TransportError;
use sockroute_protocol::{CallData, ResponseData};
use std::future::Future;
use std::sync::Arc;

/// Delivers a call on a named event and resolves with the peer's acknowledgement.
///
/// Correlating a response with its call is the transport's job. A transport
/// fault (lost connection, timeout) is reported as [`TransportError`]; any
/// answer from the peer, error or not, is a [`ResponseData`].
pub trait Transport: Send + Sync {
    fn emit(
        &self,
        event: &str,
        call: CallData,
    ) -> impl Future<Output = Result<ResponseData, TransportError>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    fn emit(
        &self,
        event: &str,
        call: CallData,
    ) -> impl Future<Output = Result<ResponseData, TransportError>> + Send {
        (**self).emit(event, call)
    }
}
