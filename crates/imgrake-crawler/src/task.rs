//! Units of work flowing between stages

use crate::probe::ImageInfo;

/// Where to look for resources, e.g. one result page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedTask {
    pub url: String,
    /// Position in the seed sequence.
    pub index: usize,
}

impl SeedTask {
    pub fn new(url: impl Into<String>, index: usize) -> Self {
        Self {
            url: url.into(),
            index,
        }
    }
}

/// One candidate resource. The terminal stage fills in the outcome fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceTask {
    pub file_url: String,
    /// Page the locator was found on.
    pub source: Option<String>,
    pub success: bool,
    pub filename: Option<String>,
    pub meta: Option<ImageInfo>,
}

impl ResourceTask {
    pub fn new(file_url: impl Into<String>) -> Self {
        Self {
            file_url: file_url.into(),
            ..Self::default()
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}
