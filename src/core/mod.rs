pub mod artifacts;
pub mod error;
pub mod job;
pub mod models;
pub mod queue;
pub mod runner;
pub mod script;
pub mod sink;
pub mod stream;
pub mod tracker;
pub mod tree;

pub use error::{RunError, SpecError, SubmitError};
pub use models::{
    FlashFlags, FlashJob, JobSpec, ListDetail, ListJob, OperationKind, ProgramJob, TargetRef,
};
pub use queue::JobService;
pub use script::ScriptGenerator;
pub use stream::{JobHandle, LiveEvent};
pub use tracker::{JobState, JobTracker, TrackedJob};
pub use tree::{TargetNode, TreeBuilder, TreeSnapshot};
