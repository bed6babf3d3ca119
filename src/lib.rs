pub mod app;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod normalizer;
pub mod observer;
pub mod permissions;
pub mod phase;
pub mod registry;
pub mod sink;
pub mod snapshot;
pub mod sources;

pub use app::{cancel_on_signal, Controller, ControllerBuilder, StatusReport};
pub use config::PhasewatchConfig;
pub use error::{PhasewatchError, Result};
pub use lifecycle::{plan_start, plan_stop, CommandLifecycle, LifecycleController};
pub use normalizer::{combine, normalize_app, normalize_infra};
pub use observer::{
    observe_start, observe_stop, AbortReason, ConvergenceObserver, ObserverSettings, StageHandoff,
    StateSources, TerminalResult,
};
pub use permissions::{Action, AllowAll, CapabilityCheck, Principal, Role, RoleTable};
pub use phase::{
    AppProbe, AppReport, AppStatus, CanonicalPhase, Direction, FailureKind, InfraCode, InfraState,
};
pub use registry::{OperationGuard, OperationRegistry};
pub use sink::{ConsoleSink, FanoutSink, RecordingSink, SnapshotBus, StatusSink, TracingSink};
pub use snapshot::{ChangeDetector, Snapshot};
pub use sources::{
    AppControl, AppStateSource, CommandInfraSource, HttpAppClient, InfraReport, InfraStateSource,
    ScriptedAppSource, ScriptedInfraSource,
};
