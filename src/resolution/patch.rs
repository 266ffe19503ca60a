//! JSON Patch operations that pin container images.

use jsonptr::PointerBuf;
use serde::{Deserialize, Serialize};

use crate::workload::ContainerClass;

/// One `replace` operation rewriting a container's image.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct JsonPatchOp {
    pub op: String,
    pub path: String,
    pub value: String,
}

impl JsonPatchOp {
    /// `replace <spec_path>/<class>/<index>/image` with `<repository>:<tag>`.
    pub fn replace_image(
        spec_path: &str,
        class: ContainerClass,
        index: usize,
        repository: &str,
        tag: &str,
    ) -> Self {
        Self {
            op: "replace".to_string(),
            path: format!("{spec_path}/{}/{index}/image", class.field()),
            value: format!("{repository}:{tag}"),
        }
    }

    /// Convert to a typed [`json_patch::PatchOperation`].
    pub fn to_operation(&self) -> json_patch::PatchOperation {
        let tokens: Vec<String> = self
            .path
            .split('/')
            .skip(1)
            .map(str::to_string)
            .collect();
        json_patch::PatchOperation::Replace(json_patch::ReplaceOperation {
            path: PointerBuf::from_tokens(tokens),
            value: serde_json::Value::String(self.value.clone()),
        })
    }
}

/// Build a [`json_patch::Patch`] out of image replacements.
pub fn to_json_patch(ops: &[JsonPatchOp]) -> json_patch::Patch {
    json_patch::Patch(ops.iter().map(JsonPatchOp::to_operation).collect())
}
