mod dispatcher;
mod events;
mod transcriber;

pub use dispatcher::{DispatchError, JobQueue, JobTrigger, TranscriptionJob, WorkerPool};
pub use events::{JobEvent, JobEventConsumer};
pub use transcriber::{
    HttpTranscriber, MockTranscriber, Transcriber, TranscriptionError, TranscriptionOutcome,
};
