use shared::metrics_defs::{MetricDef, MetricType};

pub const BACKEND_REQUESTS: MetricDef = MetricDef {
    name: "backend.requests",
    metric_type: MetricType::Counter,
    description: "Outbound requests issued. Tagged with backend, outcome.",
};

pub const BACKEND_REQUEST_DURATION: MetricDef = MetricDef {
    name: "backend.request.duration",
    metric_type: MetricType::Histogram,
    description: "Time until backend response headers, in seconds. Tagged with backend, outcome.",
};

pub const CALL_DURATION: MetricDef = MetricDef {
    name: "call.duration",
    metric_type: MetricType::Histogram,
    description: "Inbound call duration in seconds. Tagged with service, outcome.",
};

pub const CALLS_INFLIGHT: MetricDef = MetricDef {
    name: "calls.inflight",
    metric_type: MetricType::Gauge,
    description: "Number of inbound calls currently being processed",
};

pub const ALL_METRICS: &[MetricDef] = &[
    BACKEND_REQUESTS,
    BACKEND_REQUEST_DURATION,
    CALL_DURATION,
    CALLS_INFLIGHT,
];
