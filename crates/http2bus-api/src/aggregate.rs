//! Response aggregation window
//!
//! One window per in-flight request. It accumulates responses from the
//! request's event stream and closes exactly once, on whichever comes first:
//!
//! - the awaited response count is reached and the ack window has elapsed
//! - the event stream closes
//! - the response deadline passes
//!
//! Acks received inside the ack window may push the deadline out and raise
//! the awaited count.

use std::time::Duration;

use http2bus_core::{BusConfig, BusEvent, ResponseMessage, route::DEFAULT_WAIT_FOR_RESPONSES};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

/// Default response window in milliseconds
pub const DEFAULT_WAIT_FOR_RESPONSES_MS: u64 = 3000;

/// How long and for how many responses a request waits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationBudget {
    /// Responses to wait for; negative waits for the whole window
    pub wait_for_responses: i64,
    pub wait_for_responses_ms: u64,
    pub wait_for_acks_ms: Option<u64>,
}

impl AggregationBudget {
    /// Budget for a bus route, filling gaps from the gateway default
    pub fn for_route(bus: &BusConfig, default_wait_for_responses_ms: u64) -> Self {
        Self {
            wait_for_responses: bus.wait_for_responses.unwrap_or(DEFAULT_WAIT_FOR_RESPONSES),
            wait_for_responses_ms: bus
                .wait_for_responses_ms
                .unwrap_or(default_wait_for_responses_ms),
            wait_for_acks_ms: bus.wait_for_acks_ms,
        }
    }
}

impl Default for AggregationBudget {
    fn default() -> Self {
        Self {
            wait_for_responses: DEFAULT_WAIT_FOR_RESPONSES,
            wait_for_responses_ms: DEFAULT_WAIT_FOR_RESPONSES_MS,
            wait_for_acks_ms: None,
        }
    }
}

/// Collect responses until the window closes
pub async fn collect(
    mut events: mpsc::Receiver<BusEvent>,
    budget: &AggregationBudget,
) -> Vec<ResponseMessage> {
    let start = Instant::now();
    let ack_deadline = budget
        .wait_for_acks_ms
        .map(|ms| start + Duration::from_millis(ms));
    let mut deadline = start + Duration::from_millis(budget.wait_for_responses_ms);
    if let Some(ack_deadline) = ack_deadline {
        deadline = deadline.max(ack_deadline);
    }

    let mut promised: u64 = 0;
    let mut responses = Vec::new();

    loop {
        let now = Instant::now();
        if now >= deadline {
            debug!(received = responses.len(), "Aggregation window timed out");
            break;
        }

        let satisfied = budget.wait_for_responses >= 0
            && responses.len() as u64 >= promised.max(budget.wait_for_responses as u64);
        let wake = match (satisfied, ack_deadline) {
            (true, Some(ack_deadline)) if now < ack_deadline => ack_deadline,
            (true, _) => break,
            (false, _) => deadline,
        };

        tokio::select! {
            event = events.recv() => match event {
                Some(BusEvent::Response(message)) => responses.push(message),
                Some(BusEvent::Ack(ack)) => {
                    if ack_deadline.map_or(true, |d| Instant::now() <= d) {
                        if let Some(ms) = ack.timeout_ms {
                            deadline = deadline.max(start + Duration::from_millis(ms));
                        }
                        promised += u64::from(ack.responses_remaining.unwrap_or(0));
                    } else {
                        debug!("Ignoring ack received after the ack window");
                    }
                }
                None => {
                    debug!(received = responses.len(), "Event stream closed");
                    break;
                }
            },
            _ = sleep_until(wake) => {}
        }
    }

    responses
}
