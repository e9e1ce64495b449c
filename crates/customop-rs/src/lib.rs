pub mod config;
pub mod engine;
mod env;
pub mod error;
pub mod flags;
pub mod invoke;
pub mod op;
mod pool;
mod queue;
pub mod registry;
pub mod tensor;

pub use config::{EngineConfig, EngineKind, DEFAULT_MAX_WORKERS};
pub use engine::{
    CustomOpEngine, Device, DownstreamEngine, InlineEngine, OpContext, SparseBindings,
};
pub use error::{EngineError, TaskError};
pub use flags::{ExecFlags, FlagScope};
pub use op::{CustomOp, CustomOpProp, OpPropCreator};
pub use pool::PoolStats;
pub use registry::OperatorRegistry;
pub use tensor::{NDArray, Shape, StorageKind, VarHandle};
