use thiserror::Error;

use mesh_protocol::JobId;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("search space of {empty_cells} empty cells does not fit in 64 bits")]
    SearchSpaceTooLarge { empty_cells: usize },

    #[error("job {0} is already scheduled")]
    AlreadyScheduled(JobId),
}
