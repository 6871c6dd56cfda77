mod config;
mod error;
mod flow;
mod gate;
mod http;
mod iteration_metrics;
mod request_metrics;
mod schedule;
mod scheduler;
mod summary;
mod thresholds;
mod thresholds_eval;
mod worker;

pub use config::{
    ScenarioExecutor, ScenarioExecutorKind, ScenarioProfile, Stage, ThinkTime,
};
pub use error::{Error, Result};
pub use flow::{Check, Flow, FlowGroup, HttpCall, ResponseView};
pub use gate::IterationGate;
pub use http::{
    Error as HttpError, HttpClient, HttpRequest, HttpResponse, HttpTransportErrorKind,
    Result as HttpResult,
};
pub use request_metrics::RequestMetricIds;
pub use iteration_metrics::IterationMetricIds;
pub use schedule::RampingSchedule;
pub use scheduler::{RunContext, RunOutcome, run_profiles};
pub use summary::{MetricReport, MetricValues, RunState, RunSummary, build_run_summary};
pub use thresholds::{
    ThresholdAgg, ThresholdExpr, ThresholdOp, ThresholdSpec, parse_threshold_expr,
    parse_threshold_source,
};
pub use thresholds_eval::{ThresholdResult, evaluate_thresholds};
pub use worker::StartSignal;
