pub mod execution_layer;
pub mod job_queue;
pub mod round_store;

pub use execution_layer::ExecutionLayer;
pub use job_queue::JobQueue;
pub use round_store::RoundStore;
