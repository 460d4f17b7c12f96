use std::io;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("worker pool needs at least one worker")]
    NoWorkers,

    #[error("failed to spawn worker {index}")]
    Spawn {
        index: usize,
        #[source]
        source: io::Error,
    },

    #[error("worker {name} terminated by panic")]
    WorkerPanicked { name: String },
}
