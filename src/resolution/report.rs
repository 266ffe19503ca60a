//! Per-container diagnostics of one resolution pass.

use std::fmt;

use crate::workload::ContainerClass;

/// Where the tag list that resolved a container came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    Anonymous,
    PullSecret(String),
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Anonymous => f.write_str("anonymous"),
            CredentialSource::PullSecret(name) => write!(f, "secret/{name}"),
        }
    }
}

/// What happened to one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerOutcome {
    /// A patch was emitted.
    Resolved {
        tag: String,
        source: CredentialSource,
        /// No listed tag satisfied the constraint, so the constraint itself
        /// was written back as the tag.
        constraint_kept: bool,
    },
    /// The image could not be split into repository and tag.
    MalformedImage { reason: String },
    /// Every listing attempt failed.
    NoTags { attempts: usize },
}

impl ContainerOutcome {
    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            ContainerOutcome::Resolved { .. } => "resolved",
            ContainerOutcome::MalformedImage { .. } => "malformed_image",
            ContainerOutcome::NoTags { .. } => "no_tags",
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, ContainerOutcome::Resolved { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerReport {
    pub class: ContainerClass,
    pub index: usize,
    pub image: String,
    pub outcome: ContainerOutcome,
}

/// Outcomes of every container visited, in visiting order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionReport {
    containers: Vec<ContainerReport>,
}

impl ResolutionReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, report: ContainerReport) {
        self.containers.push(report);
    }

    pub fn containers(&self) -> &[ContainerReport] {
        &self.containers
    }

    pub fn resolved(&self) -> usize {
        self.containers
            .iter()
            .filter(|c| c.outcome.is_resolved())
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.containers.len() - self.resolved()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }
}
