//! Enqueue command implementation.

use medsync_core::{
    EntityId, EntityType, Mutation, MutationQueue, OperationKind, Payload, QueueConfig,
};
use std::path::{Path, PathBuf};

/// Arguments of the enqueue command.
#[derive(Debug, Default)]
pub struct EnqueueRequest {
    /// Entity type name.
    pub entity_type: String,
    /// `create`, `update` or `delete`.
    pub kind: String,
    /// Target entity, for updates and deletes.
    pub entity: Option<String>,
    /// File to read the payload from.
    pub file: Option<PathBuf>,
    /// Inline payload.
    pub data: Option<String>,
    /// MIME type of the payload.
    pub content_type: Option<String>,
}

/// Runs the enqueue command.
pub fn run(path: &Path, request: &EnqueueRequest) -> Result<(), Box<dyn std::error::Error>> {
    let mutation = build_mutation(request)?;
    let queue = MutationQueue::open_path(path, QueueConfig::default())?;
    let id = queue.enqueue(mutation)?;

    println!("Queued {id}");
    if let Some(op) = queue.get(id) {
        println!("  {} {} ({} bytes)", op.kind, op.entity_key(), op.payload.len());
    }
    Ok(())
}

fn build_mutation(request: &EnqueueRequest) -> Result<Mutation, Box<dyn std::error::Error>> {
    let entity_type: EntityType = request.entity_type.parse()?;
    let kind: OperationKind = request.kind.parse()?;

    let entity = match (&request.entity, kind) {
        (Some(raw), OperationKind::Update | OperationKind::Delete) => {
            Some(raw.parse::<EntityId>()?)
        }
        (None, OperationKind::Update | OperationKind::Delete) => {
            return Err(format!("--entity is required for {kind}").into());
        }
        (Some(_), OperationKind::Create) => {
            return Err("--entity is assigned by the queue for create".into());
        }
        (None, OperationKind::Create) => None,
    };

    let mutation = match (kind, entity) {
        (OperationKind::Delete, Some(id)) => Mutation::delete(entity_type, id),
        (OperationKind::Update, Some(id)) => Mutation::update(entity_type, id, read_payload(request)?),
        _ => Mutation::create(entity_type, read_payload(request)?),
    };
    Ok(mutation)
}

fn read_payload(request: &EnqueueRequest) -> Result<Payload, Box<dyn std::error::Error>> {
    let bytes = match (&request.file, &request.data) {
        (Some(file), _) => std::fs::read(file)?,
        (None, Some(data)) => data.as_bytes().to_vec(),
        (None, None) => Vec::new(),
    };
    let payload = Payload::new(bytes);
    Ok(match &request.content_type {
        Some(mime) => payload.with_content_type(mime.as_str()),
        None => payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn request(entity_type: &str, kind: &str) -> EnqueueRequest {
        EnqueueRequest {
            entity_type: entity_type.into(),
            kind: kind.into(),
            ..EnqueueRequest::default()
        }
    }

    #[test]
    fn create_takes_inline_data() {
        let mut req = request("health_record", "create");
        req.data = Some(r#"{"title":"visit"}"#.into());
        let mutation = build_mutation(&req).unwrap();
        assert_eq!(mutation.kind, OperationKind::Create);
        assert!(mutation.entity_id.is_none());
        assert_eq!(mutation.payload.bytes, br#"{"title":"visit"}"#.to_vec());
    }

    #[test]
    fn update_requires_entity() {
        assert!(build_mutation(&request("family_member", "update")).is_err());

        let mut req = request("family_member", "update");
        req.entity = Some(EntityId::from(medsync_core::OperationId::generate()).to_string());
        req.data = Some("{}".into());
        assert!(build_mutation(&req).is_ok());
    }

    #[test]
    fn create_rejects_entity() {
        let mut req = request("user_profile", "create");
        req.entity = Some(EntityId::from(medsync_core::OperationId::generate()).to_string());
        assert!(build_mutation(&req).is_err());
    }

    #[test]
    fn unknown_names_are_rejected() {
        assert!(build_mutation(&request("invoice", "create")).is_err());
        assert!(build_mutation(&request("health_record", "upsert")).is_err());
    }

    #[test]
    fn upload_payload_is_read_from_file() {
        let dir = TempDir::new().unwrap();
        let scan = dir.path().join("scan.png");
        std::fs::write(&scan, [0x89, b'P', b'N', b'G']).unwrap();

        let mut req = request("file_upload", "create");
        req.file = Some(scan);
        req.content_type = Some("image/png".into());
        let queue_path = dir.path().join("queue.log");
        run(&queue_path, &req).unwrap();

        let queue = MutationQueue::open_path(&queue_path, QueueConfig::default()).unwrap();
        let ops = queue.list();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].payload.content_type.as_deref(), Some("image/png"));
        assert_eq!(ops[0].payload.len(), 4);
    }

    #[test]
    fn invalid_upload_is_not_queued() {
        let dir = TempDir::new().unwrap();
        let mut req = request("file_upload", "create");
        req.data = Some("not a document".into());
        req.content_type = Some("text/plain".into());
        let queue_path = dir.path().join("queue.log");
        assert!(run(&queue_path, &req).is_err());

        let queue = MutationQueue::open_path(&queue_path, QueueConfig::default()).unwrap();
        assert!(queue.is_empty());
    }
}
