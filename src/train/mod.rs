/// Training layer: derived counts, models, callbacks and the two run strategies.
///
/// ```text
///   JobConfig ──► TrainingPlan (counts, fixed for the run)
///        │
///        ▼
///   ModelFactory::build
///        │
///        ├── generic fit ──► Prefetcher ──► fit() + EpochCallbacks
///        │
///        └── queue reader ──► BatchGenerator ──► QueueReaderModel::train
///        │
///        ▼
///   ModelArtifacts (structure + weights JSON)
/// ```

pub mod callbacks;
pub mod driver;
pub mod fit;
pub mod network;
pub mod objective;
pub mod persist;
pub mod plan;
pub mod queue;
pub mod registry;
pub mod schedule;

pub use callbacks::{
    Direction, EarlyStopping, EpochCallbacks, ModelCheckpoint, MonitorMode, ReduceLrOnPlateau,
    TerminateOnNan,
};
pub use driver::{TrainingDriver, TrainingReport};
pub use fit::{EpochLog, FitHistory, FitOptions, Termination, fit};
pub use network::{CompiledModel, ModelStructure, Weights, WindowRegressor};
pub use objective::Objective;
pub use persist::ModelArtifacts;
pub use plan::TrainingPlan;
pub use queue::{QueueReaderModel, QueueReaderTrainer, QueueRun};
pub use registry::{BuiltModel, ModelFactory, Strategy};
pub use schedule::LossPlateauLrDecay;
