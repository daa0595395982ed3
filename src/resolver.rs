//! Input resolution: turn local binaries and hosted references into an
//! ordered list of hosted URLs.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::UploadError;
use crate::types::{InputReference, InputSource, ResolvedInput};

/// External upload collaborator. Accepts a binary, returns a hosted URL.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(
        &self,
        file_name: &str,
        content_type: &str,
        data: Arc<Vec<u8>>,
    ) -> Result<String, UploadError>;
}

/// Resolves inputs in caller order, uploading local binaries one by one.
#[derive(Clone)]
pub struct InputResolver {
    uploader: Arc<dyn Uploader>,
}

impl InputResolver {
    pub fn new(uploader: Arc<dyn Uploader>) -> Self {
        Self { uploader }
    }

    /// Resolve every resolvable input, preserving order exactly.
    ///
    /// Stops at the first failed upload. Inputs are never dropped after a
    /// failure, since a shrunken set could fall below the capability minimum.
    pub async fn resolve(&self, inputs: &[InputReference]) -> Result<Vec<ResolvedInput>, UploadError> {
        let mut resolved = Vec::with_capacity(inputs.len());

        for input in inputs.iter().filter(|i| i.is_resolvable()) {
            let url = match &input.source {
                InputSource::Hosted { url } => url.trim().to_string(),
                InputSource::Local {
                    file_name,
                    content_type,
                    data,
                } => {
                    tracing::debug!(
                        input_id = %input.id,
                        file_name = %file_name,
                        bytes = data.len(),
                        "Uploading input"
                    );
                    let url = self
                        .uploader
                        .upload(file_name, content_type, Arc::clone(data))
                        .await?;
                    if url.trim().is_empty() {
                        return Err(UploadError::InvalidResponse(format!(
                            "Upload of {} returned an empty URL",
                            file_name
                        )));
                    }
                    url
                }
            };

            resolved.push(ResolvedInput {
                input_id: input.id.clone(),
                media_type: input.media_type,
                role: input.role.clone(),
                url,
            });
        }

        Ok(resolved)
    }
}

/// Ordered set of inputs attached to a composer grid.
///
/// Every edit returns a new set; the order of the final set is the order
/// the payload will use.
#[derive(Debug, Clone, Default)]
pub struct InputSet {
    items: Vec<InputReference>,
}

impl InputSet {
    pub fn new(items: Vec<InputReference>) -> Self {
        Self { items }
    }

    pub fn items(&self) -> &[InputReference] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Append an input, ignoring it if the set already holds `max` items.
    pub fn with_appended(&self, input: InputReference, max: usize) -> Self {
        let mut items = self.items.clone();
        if items.len() < max {
            items.push(input);
        }
        Self { items }
    }

    /// Put `input` at grid slot `index`, replacing what was there. Indexes
    /// past the end append.
    pub fn with_slot(&self, index: usize, input: InputReference) -> Self {
        let mut items = self.items.clone();
        if index < items.len() {
            items[index] = input;
        } else {
            items.push(input);
        }
        Self { items }
    }

    /// Remove the input with the given id.
    pub fn without(&self, input_id: &str) -> Self {
        Self {
            items: self
                .items
                .iter()
                .filter(|i| i.id != input_id)
                .cloned()
                .collect(),
        }
    }

    /// Move the item at `from` to position `to`. Out-of-range moves return
    /// an unchanged copy.
    pub fn reordered(&self, from: usize, to: usize) -> Self {
        let mut items = self.items.clone();
        if from < items.len() && to < items.len() && from != to {
            let item = items.remove(from);
            items.insert(to, item);
        }
        Self { items }
    }

    /// Drop slots that hold nothing resolvable, keeping relative order.
    pub fn compacted(&self) -> Self {
        Self {
            items: self
                .items
                .iter()
                .filter(|i| i.is_resolvable())
                .cloned()
                .collect(),
        }
    }

    pub fn into_inner(self) -> Vec<InputReference> {
        self.items
    }
}
