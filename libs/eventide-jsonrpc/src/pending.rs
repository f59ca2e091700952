//! `PendingRequest`: a one-shot event plus result holder for one outbound
//! request (spec §3.5, §4.F.6/§4.F.7).

use std::cell::RefCell;

use eventide_rt::sync::Event;
use serde_json::Value;

use crate::error::RpcError;

pub struct PendingRequest {
    event: Event,
    result: RefCell<Option<Result<Value, RpcError>>>,
}

impl PendingRequest {
    pub fn new() -> Self {
        Self {
            event: Event::new(),
            result: RefCell::new(None),
        }
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    /// Write the holder slot, then wake the awaiter, so a waiter that
    /// observes the event set can never see a stale or missing result.
    pub fn complete(&self, result: Result<Value, RpcError>) {
        *self.result.borrow_mut() = Some(result);
        self.event.set();
    }

    pub fn take_result(&self) -> Option<Result<Value, RpcError>> {
        self.result.borrow_mut().take()
    }
}

impl Default for PendingRequest {
    fn default() -> Self {
        Self::new()
    }
}
