//! Per-kind capability interface.
//!
//! A manager is not specialized by type: everything kind-specific comes from
//! the [`KindAdapter`] it is constructed with.

use crate::{EntityKind, IndexSpec, KindSchema, Properties, RemoteProperties};
use serde_json::Value;

pub trait KindAdapter: Send + Sync {
    fn kind(&self) -> EntityKind;

    /// Local property schema.
    fn schema(&self) -> &KindSchema;

    /// Remote property names to request on download.
    fn api_properties(&self) -> &[String];

    /// Related kinds whose associations are requested on download.
    fn down_associations(&self) -> &[EntityKind];

    /// Related kinds whose association changes this kind pushes. Changes to
    /// other kinds are pushed by the reciprocal side and stay staged here
    /// until that push is confirmed.
    fn up_associations(&self) -> &[EntityKind];

    /// Convert a downloaded property bag to local data. `None` skips the
    /// record.
    fn from_api(&self, properties: &RemoteProperties) -> Option<Properties>;

    /// Map a local property to `(remote name, remote value)`. `None` means the
    /// property is never pushed.
    fn to_api(&self, property: &str, value: &Value) -> Option<(String, String)>;

    /// Ordered business identifier properties, used to recognize freshly
    /// created records in a creation response.
    fn identifiers(&self) -> &[String];

    /// Extra indexes beyond the remote id index.
    fn indexes(&self) -> Vec<IndexSpec> {
        Vec::new()
    }
}
