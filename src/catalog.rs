//! Catalog of enrolled topics, their courses and per-course lecture videos
//!
//! The [`Catalog`] trait is what the planner depends on; [`PlatformCatalog`]
//! implements it against the live platform through a signed-in [`Session`].

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::CoursyncError;
use crate::session::Session;

/// A subject the user is enrolled in, e.g. "Machine Learning"
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Topic {
    pub name: String,
    #[serde(default)]
    pub short_name: String,
    #[serde(default)]
    pub courses: Vec<Course>,
}

/// A scheduled instance of a topic
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Course {
    pub name: String,
    #[serde(default)]
    pub active: bool,
    /// Base link all course-scoped URLs derive from, ends with `/`
    pub home_link: String,
}

impl Topic {
    pub fn active_courses(&self) -> usize {
        self.courses.iter().filter(|course| course.active).count()
    }

    /// "<position>. <name> (<active> of <total> active)"
    pub fn describe(&self, position: usize) -> String {
        format!(
            "{}. {} ({} of {} active)",
            position,
            self.name,
            self.active_courses(),
            self.courses.len()
        )
    }
}

impl Course {
    pub fn auth_url(&self) -> String {
        format!("{}auth/auth_redirector?type=login&subtype=normal", self.home_link)
    }

    pub fn lecture_index_url(&self) -> String {
        format!("{}lecture/index", self.home_link)
    }

    /// Prefix every video URL of this course starts with
    pub fn video_url_prefix(&self) -> String {
        format!("{}lecture/download.mp4?lecture_id=", self.home_link)
    }
}

/// Source of enrolled-course records and per-course video URLs
///
/// Every method fails with [`CoursyncError::SessionExpired`] once the
/// underlying session has expired.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn list_enrolled_topics(&self) -> Result<Vec<Topic>, CoursyncError>;

    /// Obtain the per-course cookies needed before video discovery
    async fn authorize_course(&self, course: &Course) -> Result<(), CoursyncError>;

    async fn list_video_urls(&self, course: &Course) -> Result<Vec<String>, CoursyncError>;
}

/// [`Catalog`] backed by the platform's JSON API and lecture pages
pub struct PlatformCatalog {
    session: Arc<Session>,
}

impl PlatformCatalog {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl Catalog for PlatformCatalog {
    async fn list_enrolled_topics(&self) -> Result<Vec<Topic>, CoursyncError> {
        let url = self.session.settings().topic_list_url(self.session.user().id);
        let topics: Vec<Topic> = self
            .session
            .get(&url)
            .await?
            .json()
            .await
            .map_err(|e| CoursyncError::Catalog(format!("failed to decode enrolled topics: {}", e)))?;

        info!("Found {} enrolled topics", topics.len());
        Ok(topics)
    }

    async fn authorize_course(&self, course: &Course) -> Result<(), CoursyncError> {
        debug!("Authorizing course {}", course.home_link);
        self.session.get(&course.auth_url()).await?.bytes().await?;
        Ok(())
    }

    async fn list_video_urls(&self, course: &Course) -> Result<Vec<String>, CoursyncError> {
        let html = self
            .session
            .get(&course.lecture_index_url())
            .await?
            .text()
            .await?;

        let urls = extract_video_urls(course, &html)?;
        debug!("Found {} videos for {}", urls.len(), course.home_link);
        Ok(urls)
    }
}

/// Every video URL of `course` embedded in a lecture page, first occurrence first
pub fn extract_video_urls(course: &Course, html: &str) -> Result<Vec<String>, CoursyncError> {
    let pattern = format!(r"{}\d+", regex::escape(&course.video_url_prefix()));
    let re = Regex::new(&pattern)
        .map_err(|e| CoursyncError::Catalog(format!("bad video URL pattern: {}", e)))?;

    let mut seen = HashSet::new();
    Ok(re
        .find_iter(html)
        .map(|m| m.as_str().to_string())
        .filter(|url| seen.insert(url.clone()))
        .collect())
}
