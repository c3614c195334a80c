//! Expands enrolled topics into download work items

use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::catalog::{Catalog, Course, Topic};
use crate::error::CoursyncError;
use crate::sync::WorkItem;

/// A course that could not be expanded into work items
#[derive(Debug)]
pub struct CourseFailure {
    pub course: String,
    pub error: CoursyncError,
}

/// Work items for every active course, plus what was left out and why
#[derive(Debug, Default)]
pub struct WorkPlan {
    pub items: Vec<WorkItem>,
    /// Labels of courses skipped because they are not running
    pub inactive: Vec<String>,
    pub failures: Vec<CourseFailure>,
    /// Planning stopped early because of an interrupt
    pub interrupted: bool,
}

/// "<topic> (<n>)" where n is the 1-based position of the course in its topic
pub fn course_label(topic: &Topic, index: usize) -> String {
    format!("{} ({})", topic.name, index + 1)
}

/// `<output_dir>/<short_name>-<course name>`, with path separators flattened
pub fn course_directory(output_dir: &Path, topic: &Topic, course: &Course) -> PathBuf {
    let name = format!("{}-{}", topic.short_name, course.name).replace(['/', '\\'], "-");
    output_dir.join(name)
}

/// Authorize every active course and turn its videos into work items.
///
/// A course whose authorization or video listing fails is recorded and
/// skipped. An expired session stops planning altogether, and so does
/// `cancel` firing; courses planned before either are kept.
pub async fn plan_work_items(
    catalog: &dyn Catalog,
    topics: &[Topic],
    output_dir: &Path,
    cancel: &CancellationToken,
) -> WorkPlan {
    let mut plan = WorkPlan::default();

    'topics: for topic in topics {
        for (index, course) in topic.courses.iter().enumerate() {
            if cancel.is_cancelled() {
                info!("Interrupted, planning stopped");
                plan.interrupted = true;
                break 'topics;
            }

            let label = course_label(topic, index);

            if !course.active {
                plan.inactive.push(label);
                continue;
            }

            info!("Getting video list for {}", label);
            let videos = match list_course_videos(catalog, course).await {
                Ok(videos) => videos,
                Err(error) => {
                    warn!("Skipping {}: {}", label, error);
                    let expired = error.is_session_expired();
                    plan.failures.push(CourseFailure {
                        course: label,
                        error,
                    });
                    if expired {
                        break 'topics;
                    }
                    continue;
                }
            };

            let directory = course_directory(output_dir, topic, course);
            let total = videos.len();
            plan.items.extend(videos.into_iter().enumerate().map(|(j, video_url)| WorkItem {
                directory: directory.clone(),
                video_url,
                label: format!("{} video {} of {}", label, j + 1, total),
            }));
        }
    }

    plan
}

async fn list_course_videos(catalog: &dyn Catalog, course: &Course) -> Result<Vec<String>, CoursyncError> {
    catalog.authorize_course(course).await?;
    catalog.list_video_urls(course).await
}
