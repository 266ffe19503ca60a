//! Locating the pod spec inside admitted workloads.
//!
//! Each supported kind knows how to decode its object and where its pod
//! spec lives, which is the prefix of every JSON Patch path emitted for it.
//! Kinds outside the table are not an error: they simply have nothing to
//! patch.

use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Pod spec location for `Pod`.
pub const POD_SPEC_PATH: &str = "/spec";
/// Pod spec location for kinds with a pod template.
pub const TEMPLATE_SPEC_PATH: &str = "/spec/template/spec";
/// Pod spec location for `CronJob`.
pub const CRON_JOB_SPEC_PATH: &str = "/spec/jobTemplate/spec/template/spec";

/// Errors from decoding a workload object.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("failed to decode {kind}: {source}")]
    Decode {
        kind: WorkloadKind,
        #[source]
        source: serde_json::Error,
    },
}

/// Reference to an image pull secret in the workload's namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullSecretRef {
    pub name: String,
}

impl PullSecretRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A container's image as declared in the pod spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRef {
    pub name: Option<String>,
    pub image: String,
}

/// Which container array of the pod spec a container belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerClass {
    Init,
    Regular,
}

impl ContainerClass {
    /// Both classes, in the order they are resolved.
    pub const ALL: [ContainerClass; 2] = [ContainerClass::Init, ContainerClass::Regular];

    /// Field name of the array in the pod spec.
    pub fn field(self) -> &'static str {
        match self {
            ContainerClass::Init => "initContainers",
            ContainerClass::Regular => "containers",
        }
    }
}

impl fmt::Display for ContainerClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field())
    }
}

/// The parts of a pod spec resolution reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkloadSpec {
    pub init_containers: Vec<ContainerRef>,
    pub containers: Vec<ContainerRef>,
    pub image_pull_secrets: Vec<PullSecretRef>,
}

impl WorkloadSpec {
    pub fn containers_of(&self, class: ContainerClass) -> &[ContainerRef] {
        match class {
            ContainerClass::Init => &self.init_containers,
            ContainerClass::Regular => &self.containers,
        }
    }
}

/// A decoded workload: its pod spec, patch prefix and namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedWorkload {
    pub spec: WorkloadSpec,
    pub spec_path: &'static str,
    pub namespace: String,
}

/// How a kind's object is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Pod,
    Template,
    CronJob,
}

/// Workload kinds the webhook understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadKind {
    Pod,
    ReplicationController,
    Job,
    ReplicaSet,
    Deployment,
    StatefulSet,
    DaemonSet,
    CronJob,
    /// Any other kind; extraction yields nothing.
    Unrecognized,
}

impl WorkloadKind {
    pub fn from_kind(kind: &str) -> Self {
        match kind {
            "Pod" => WorkloadKind::Pod,
            "ReplicationController" => WorkloadKind::ReplicationController,
            "Job" => WorkloadKind::Job,
            "ReplicaSet" => WorkloadKind::ReplicaSet,
            "Deployment" => WorkloadKind::Deployment,
            "StatefulSet" => WorkloadKind::StatefulSet,
            "DaemonSet" => WorkloadKind::DaemonSet,
            "CronJob" => WorkloadKind::CronJob,
            _ => WorkloadKind::Unrecognized,
        }
    }

    fn shape(self) -> Option<Shape> {
        match self {
            WorkloadKind::Pod => Some(Shape::Pod),
            WorkloadKind::ReplicationController
            | WorkloadKind::Job
            | WorkloadKind::ReplicaSet
            | WorkloadKind::Deployment
            | WorkloadKind::StatefulSet
            | WorkloadKind::DaemonSet => Some(Shape::Template),
            WorkloadKind::CronJob => Some(Shape::CronJob),
            WorkloadKind::Unrecognized => None,
        }
    }

    /// JSON Patch prefix of the pod spec, `None` for unrecognized kinds.
    pub fn spec_path(self) -> Option<&'static str> {
        self.shape().map(|shape| match shape {
            Shape::Pod => POD_SPEC_PATH,
            Shape::Template => TEMPLATE_SPEC_PATH,
            Shape::CronJob => CRON_JOB_SPEC_PATH,
        })
    }

    pub fn is_supported(self) -> bool {
        self.shape().is_some()
    }

    /// Decode `object` and locate its pod spec.
    ///
    /// Returns `Ok(None)` for unrecognized kinds.
    pub fn extract(
        self,
        object: &serde_json::Value,
    ) -> Result<Option<ExtractedWorkload>, ExtractError> {
        let (Some(shape), Some(spec_path)) = (self.shape(), self.spec_path()) else {
            return Ok(None);
        };

        let (metadata, pod_spec) = match shape {
            Shape::Pod => {
                let pod: PodShape = self.decode(object)?;
                (pod.metadata, pod.spec.unwrap_or_default())
            }
            Shape::Template => {
                let workload: TemplateShape = self.decode(object)?;
                (workload.metadata, workload.spec.unwrap_or_default().pod_spec())
            }
            Shape::CronJob => {
                let cron_job: CronJobShape = self.decode(object)?;
                let job_spec = cron_job
                    .spec
                    .unwrap_or_default()
                    .job_template
                    .unwrap_or_default()
                    .spec
                    .unwrap_or_default();
                (cron_job.metadata, job_spec.pod_spec())
            }
        };

        Ok(Some(ExtractedWorkload {
            spec: pod_spec.into(),
            spec_path,
            namespace: metadata.and_then(|m| m.namespace).unwrap_or_default(),
        }))
    }

    fn decode<T: DeserializeOwned>(self, object: &serde_json::Value) -> Result<T, ExtractError> {
        T::deserialize(object).map_err(|source| ExtractError::Decode { kind: self, source })
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Extract the pod spec of an object of kind `kind`.
pub fn extract(
    kind: &str,
    object: &serde_json::Value,
) -> Result<Option<ExtractedWorkload>, ExtractError> {
    WorkloadKind::from_kind(kind).extract(object)
}

// Decode shapes. Optional everywhere so that absent or null fields read as empty.

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct PodSpecShape {
    #[serde(default)]
    init_containers: Option<Vec<ContainerShape>>,
    #[serde(default)]
    containers: Option<Vec<ContainerShape>>,
    #[serde(default)]
    image_pull_secrets: Option<Vec<PullSecretShape>>,
}

#[derive(Deserialize)]
struct ContainerShape {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    image: Option<String>,
}

#[derive(Deserialize)]
struct PullSecretShape {
    #[serde(default)]
    name: Option<String>,
}

impl From<ContainerShape> for ContainerRef {
    fn from(shape: ContainerShape) -> Self {
        Self {
            name: shape.name,
            image: shape.image.unwrap_or_default(),
        }
    }
}

impl From<PodSpecShape> for WorkloadSpec {
    fn from(shape: PodSpecShape) -> Self {
        let containers = |list: Option<Vec<ContainerShape>>| {
            list.unwrap_or_default()
                .into_iter()
                .map(ContainerRef::from)
                .collect()
        };
        Self {
            init_containers: containers(shape.init_containers),
            containers: containers(shape.containers),
            image_pull_secrets: shape
                .image_pull_secrets
                .unwrap_or_default()
                .into_iter()
                .map(|s| PullSecretRef::new(s.name.unwrap_or_default()))
                .collect(),
        }
    }
}

#[derive(Deserialize)]
struct PodShape {
    #[serde(default)]
    metadata: Option<ObjectMeta>,
    #[serde(default)]
    spec: Option<PodSpecShape>,
}

#[derive(Deserialize, Default)]
struct PodTemplateShape {
    #[serde(default)]
    spec: Option<PodSpecShape>,
}

#[derive(Deserialize, Default)]
struct TemplateSpecShape {
    #[serde(default)]
    template: Option<PodTemplateShape>,
}

impl TemplateSpecShape {
    fn pod_spec(self) -> PodSpecShape {
        self.template.unwrap_or_default().spec.unwrap_or_default()
    }
}

#[derive(Deserialize)]
struct TemplateShape {
    #[serde(default)]
    metadata: Option<ObjectMeta>,
    #[serde(default)]
    spec: Option<TemplateSpecShape>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct CronJobSpecShape {
    #[serde(default)]
    job_template: Option<JobTemplateShape>,
}

#[derive(Deserialize, Default)]
struct JobTemplateShape {
    #[serde(default)]
    spec: Option<TemplateSpecShape>,
}

#[derive(Deserialize)]
struct CronJobShape {
    #[serde(default)]
    metadata: Option<ObjectMeta>,
    #[serde(default)]
    spec: Option<CronJobSpecShape>,
}
