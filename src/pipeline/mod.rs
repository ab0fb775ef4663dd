//! The `user_registry` pipeline.
//!
//! ```text
//! start -> get_data -> format_data -> branch_by_gender
//!     branch_by_gender -> process_male_data   -> stream_male_to_kafka   -+
//!     branch_by_gender -> process_female_data -> stream_female_to_kafka -+-> end
//!     branch_by_gender -> unknown_gender --------------------------------+
//! ```
//!
//! `end` joins the three paths and runs once any of them succeeded.

pub mod publisher;
pub mod record;
pub mod source;
pub mod tasks;

use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::core::dag::{Dag, DagBuilder, DagError};

pub use publisher::{PublishError, Publisher, RestProxyPublisher};
pub use record::{Enrichment, Gender, RawUser, UserRecord};
pub use source::{FetchError, HttpRecordSource, RecordSource};
pub use tasks::{
    BranchByGender, EmptyTask, FetchRecordTask, FormatRecordTask, ProcessGenderTask, StreamTask,
    record_key,
};

pub const START: &str = "start";
pub const GET_DATA: &str = "get_data";
pub const FORMAT_DATA: &str = "format_data";
pub const BRANCH_BY_GENDER: &str = "branch_by_gender";
pub const PROCESS_MALE: &str = "process_male_data";
pub const PROCESS_FEMALE: &str = "process_female_data";
pub const UNKNOWN_GENDER: &str = "unknown_gender";
pub const STREAM_MALE: &str = "stream_male_to_kafka";
pub const STREAM_FEMALE: &str = "stream_female_to_kafka";
pub const END: &str = "end";

/// Build the `user_registry` graph.
///
/// Every node gets the configured retry policy; both stream nodes pace
/// their successful publish to `publish_interval`.
pub fn build_user_registry(
    config: &PipelineConfig,
    source: Arc<dyn RecordSource>,
    publisher: Arc<dyn Publisher>,
) -> Result<Dag, DagError> {
    let retry = config.retry.to_policy();
    let topic = config.broker.topic.as_str();
    let interval = config.publish_interval();

    DagBuilder::new(config.id.as_str(), config.name.as_str())
        .add_task(Arc::new(EmptyTask::new(START, retry.clone())))
        .add_task_with_deps(
            Arc::new(FetchRecordTask::new(GET_DATA, source, retry.clone())),
            &[START],
        )
        .add_task_with_deps(
            Arc::new(FormatRecordTask::new(FORMAT_DATA, GET_DATA, retry.clone())),
            &[GET_DATA],
        )
        .add_branch(
            Arc::new(BranchByGender::new(
                BRANCH_BY_GENDER,
                FORMAT_DATA,
                retry.clone(),
            )),
            &[FORMAT_DATA],
            &[PROCESS_MALE, PROCESS_FEMALE, UNKNOWN_GENDER],
            UNKNOWN_GENDER,
        )
        .add_task_with_deps(
            Arc::new(ProcessGenderTask::new(
                PROCESS_MALE,
                FORMAT_DATA,
                Enrichment::MALE,
                retry.clone(),
            )),
            &[FORMAT_DATA],
        )
        .add_task_with_deps(
            Arc::new(ProcessGenderTask::new(
                PROCESS_FEMALE,
                FORMAT_DATA,
                Enrichment::FEMALE,
                retry.clone(),
            )),
            &[FORMAT_DATA],
        )
        .add_task(Arc::new(EmptyTask::new(UNKNOWN_GENDER, retry.clone())))
        .add_task_with_deps(
            Arc::new(StreamTask::new(
                STREAM_MALE,
                PROCESS_MALE,
                publisher.clone(),
                topic,
                interval,
                retry.clone(),
            )),
            &[PROCESS_MALE],
        )
        .add_task_with_deps(
            Arc::new(StreamTask::new(
                STREAM_FEMALE,
                PROCESS_FEMALE,
                publisher,
                topic,
                interval,
                retry.clone(),
            )),
            &[PROCESS_FEMALE],
        )
        .add_join(
            Arc::new(EmptyTask::new(END, retry)),
            &[STREAM_MALE, STREAM_FEMALE, UNKNOWN_GENDER],
        )
        .build()
}
