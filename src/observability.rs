use biometrics::{Collector, Counter, Moments};

pub(crate) static CLIENT_REQUESTS: Counter = Counter::new("casebreaker.client.requests");
pub(crate) static CLIENT_REQUEST_ERRORS: Counter =
    Counter::new("casebreaker.client.request_errors");
pub(crate) static CLIENT_REQUEST_RETRIES: Counter = Counter::new("casebreaker.client.retries");
pub(crate) static CLIENT_REQUEST_DURATION: Moments =
    Moments::new("casebreaker.client.request_duration_seconds");

pub(crate) static STREAM_EVENTS: Counter = Counter::new("casebreaker.stream.events");
pub(crate) static STREAM_MALFORMED: Counter = Counter::new("casebreaker.stream.malformed");
pub(crate) static STREAM_BYTES: Counter = Counter::new("casebreaker.stream.bytes");

pub(crate) static CHAT_TURNS: Counter = Counter::new("casebreaker.chat.turns");
pub(crate) static CHAT_TURN_ERRORS: Counter = Counter::new("casebreaker.chat.turn_errors");
pub(crate) static CHAT_TURN_DURATION: Moments =
    Moments::new("casebreaker.chat.turn_duration_seconds");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&CLIENT_REQUESTS);
    collector.register_counter(&CLIENT_REQUEST_ERRORS);
    collector.register_counter(&CLIENT_REQUEST_RETRIES);
    collector.register_moments(&CLIENT_REQUEST_DURATION);

    collector.register_counter(&STREAM_EVENTS);
    collector.register_counter(&STREAM_MALFORMED);
    collector.register_counter(&STREAM_BYTES);

    collector.register_counter(&CHAT_TURNS);
    collector.register_counter(&CHAT_TURN_ERRORS);
    collector.register_moments(&CHAT_TURN_DURATION);
}
