//! Deterministic node identities.
//!
//! `node = uuid5(uuid5(uuid5(NAMESPACE_URL, domain), node_type), signature)`
//!
//! The derivation must stay bit-for-bit stable: graphs loaded by earlier
//! runs are matched by these ids.

use uuid::Uuid;

use tabgraph_core::NodeId;

use crate::record::{Identity, Record};
use crate::schema::Schema;

/// Separator between values of a multi-property identity.
const ID_SEPARATOR: &str = ":";

#[derive(Debug, Clone)]
pub struct IdentityAssigner {
    base: Uuid,
}

impl IdentityAssigner {
    pub fn new(domain: &str) -> Self {
        Self {
            base: Uuid::new_v5(&Uuid::NAMESPACE_URL, domain.as_bytes()),
        }
    }

    /// Id of a node of `node_type` with the given signature.
    pub fn assign(&self, node_type: &str, signature: &str) -> NodeId {
        let type_id = Uuid::new_v5(&self.base, node_type.as_bytes());
        NodeId(Uuid::new_v5(&type_id, signature.as_bytes()))
    }

    /// Signature of a record: the identifying property values, or the whole
    /// record content when the node type declares none.
    pub fn signature(record: &Record, schema: &Schema) -> String {
        let id_properties = schema.id_properties(&record.node_type);
        if id_properties.is_empty() {
            return content_signature(record);
        }
        id_properties
            .iter()
            .map(|p| record.properties.get(p).map(String::as_str).unwrap_or(""))
            .collect::<Vec<_>>()
            .join(ID_SEPARATOR)
    }

    pub fn identify(&self, record: &mut Record, schema: &Schema) {
        let signature = Self::signature(record, schema);
        let id = self.assign(&record.node_type, &signature);
        record.identity = Some(Identity { id, signature });
    }

    pub fn identify_all(&self, records: &mut [Record], schema: &Schema) {
        for record in records {
            self.identify(record, schema);
        }
    }
}

/// `{ k1: v1, k2: v2 }` over the record's properties, sorted by name.
/// Parent pointers are relationships, not content, and stay out.
fn content_signature(record: &Record) -> String {
    let body = record
        .properties
        .iter()
        .map(|(k, v)| format!("{k}: {v}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{{ {body} }}")
}
