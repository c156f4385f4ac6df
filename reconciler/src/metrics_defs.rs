//! Metrics emitted by a reconciliation run.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
}

#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub description: &'static str,
}

pub const RUN_SUCCESS: MetricDef = MetricDef {
    name: "nrupdate.run.success",
    metric_type: MetricType::Counter,
    description: "Number of reconciliation runs that saved the forwarder config",
};

pub const RUN_FAILURE: MetricDef = MetricDef {
    name: "nrupdate.run.failure",
    metric_type: MetricType::Counter,
    description: "Number of reconciliation runs that stopped on an error",
};

pub const RUN_DURATION: MetricDef = MetricDef {
    name: "nrupdate.run.duration",
    metric_type: MetricType::Histogram,
    description: "Time to complete a reconciliation run in seconds",
};

pub const DEVICES_UPDATED: MetricDef = MetricDef {
    name: "nrupdate.devices.updated",
    metric_type: MetricType::Gauge,
    description: "Sentinel devices whose alert route was rewritten by the last run",
};

pub const CREDENTIALS_FOUND: MetricDef = MetricDef {
    name: "nrupdate.credentials.found",
    metric_type: MetricType::Gauge,
    description: "Owner credentials found by the last run",
};

pub const ALL_METRICS: &[MetricDef] = &[
    RUN_SUCCESS,
    RUN_FAILURE,
    RUN_DURATION,
    DEVICES_UPDATED,
    CREDENTIALS_FOUND,
];

/// Registers descriptions with whatever recorder is installed.
pub fn describe_all() {
    for def in ALL_METRICS {
        match def.metric_type {
            MetricType::Counter => metrics::describe_counter!(def.name, def.description),
            MetricType::Gauge => metrics::describe_gauge!(def.name, def.description),
            MetricType::Histogram => metrics::describe_histogram!(def.name, def.description),
        }
    }
}

#[macro_export]
macro_rules! counter {
    ($def:expr) => {
        metrics::counter!($def.name)
    };
}

#[macro_export]
macro_rules! gauge {
    ($def:expr) => {
        metrics::gauge!($def.name)
    };
}

#[macro_export]
macro_rules! histogram {
    ($def:expr) => {
        metrics::histogram!($def.name)
    };
}
