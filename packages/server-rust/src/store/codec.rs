//! JSON entity codec over [`MemoryEntityStore`].
//!
//! Cross-entity references live in the entity body under `"references"` as a
//! list of entity ids. Exported documents carry external ids there; stored
//! entities carry local ids. A reference counts as resolved when an entity
//! with that external id (or own id) exists locally.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use entityvc_core::{
    EntityExportData, EntityId, EntityRelation, EntityType, EntityTypeVersionLoadConfig,
    RequestContext, TenantId, VersionCreateConfig,
};
use serde_json::Value;

use super::memory::{MemoryEntityStore, StoredEntity};
use crate::traits::{
    CredentialsValidationError, EntityCodec, EntityImportResult, ImportScope,
    MissingReferenceError, TxId,
};

const REFERENCES: &str = "references";

pub struct JsonEntityCodec {
    store: Arc<MemoryEntityStore>,
}

impl JsonEntityCodec {
    #[must_use]
    pub fn new(store: Arc<MemoryEntityStore>) -> Self {
        Self { store }
    }

    /// External id a local entity is exported under.
    fn external_of(&self, tenant_id: TenantId, local: EntityId) -> EntityId {
        self.store
            .get(tenant_id, local, None)
            .and_then(|e| e.external_id)
            .unwrap_or(local)
    }

    /// Local id of the entity imported from `external`, if it exists.
    fn local_of(&self, tenant_id: TenantId, external: EntityId, tx: Option<TxId>) -> Option<EntityId> {
        self.store
            .find_by_external_id(tenant_id, external, tx)
            .map(|e| e.id)
    }
}

/// Rewrite every id in `body["references"]` with `map`. A `None` from `map`
/// leaves a null placeholder.
fn map_references<F>(body: &Value, mut map: F) -> anyhow::Result<Value>
where
    F: FnMut(EntityId) -> anyhow::Result<Option<EntityId>>,
{
    let mut body = body.clone();
    let Some(references) = body.get_mut(REFERENCES).and_then(Value::as_array_mut) else {
        return Ok(body);
    };
    for reference in references.iter_mut() {
        if reference.is_null() {
            continue;
        }
        let id: EntityId = serde_json::from_value(reference.clone())
            .with_context(|| format!("malformed reference {reference}"))?;
        *reference = match map(id)? {
            Some(mapped) => serde_json::to_value(mapped)?,
            None => Value::Null,
        };
    }
    Ok(body)
}

fn validate_credentials(credentials: &Value) -> Result<(), CredentialsValidationError> {
    let id = credentials
        .get("credentialsId")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if id.trim().is_empty() {
        return Err(CredentialsValidationError {
            message: "credentialsId is empty".to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl EntityCodec for JsonEntityCodec {
    async fn export_entity(
        &self,
        ctx: &RequestContext,
        entity_id: EntityId,
        config: &VersionCreateConfig,
    ) -> anyhow::Result<EntityExportData> {
        let tenant_id = ctx.tenant_id;
        let stored = self
            .store
            .get(tenant_id, entity_id, None)
            .with_context(|| format!("entity {entity_id} not found"))?;

        let entity = map_references(&stored.body, |local| Ok(Some(self.external_of(tenant_id, local))))?;
        let relations = if config.save_relations {
            stored
                .relations
                .iter()
                .map(|r| EntityRelation {
                    to: self.external_of(tenant_id, r.to),
                    relation_type: r.relation_type.clone(),
                })
                .collect()
        } else {
            Vec::new()
        };
        let credentials = if config.save_credentials && stored.id.entity_type == EntityType::Device {
            stored.credentials.clone()
        } else {
            None
        };

        Ok(EntityExportData {
            entity_type: stored.id.entity_type,
            external_id: stored.external_id.unwrap_or(stored.id),
            name: stored.name.clone(),
            entity,
            relations,
            attributes: if config.save_attributes {
                stored.attributes.clone()
            } else {
                Default::default()
            },
            credentials,
        })
    }

    async fn import_entity(
        &self,
        scope: &ImportScope,
        data: &EntityExportData,
        config: &EntityTypeVersionLoadConfig,
        final_attempt: bool,
    ) -> anyhow::Result<EntityImportResult> {
        let ImportScope {
            tenant_id,
            transaction,
        } = *scope;

        if config.config.load_credentials {
            if let Some(credentials) = &data.credentials {
                validate_credentials(credentials)?;
            }
        }

        let mut resolved = true;
        let body = map_references(&data.entity, |external| {
            match self.local_of(tenant_id, external, transaction) {
                Some(local) => Ok(Some(local)),
                None if final_attempt => Err(MissingReferenceError { missing: external }.into()),
                None => {
                    resolved = false;
                    Ok(None)
                }
            }
        })?;

        let existing = self
            .store
            .find_by_external_id(tenant_id, data.external_id, transaction)
            .or_else(|| {
                config
                    .find_existing_entity_by_name
                    .then(|| self.store.find_by_name(tenant_id, data.entity_type, &data.name, transaction))
                    .flatten()
            });

        let mut entity = existing.clone().unwrap_or_else(|| {
            StoredEntity::new(EntityId::random(data.entity_type), data.name.clone(), Value::Null)
        });
        entity.external_id = Some(data.external_id);
        entity.name.clone_from(&data.name);
        entity.body = body;
        if config.config.load_attributes {
            entity.attributes.clone_from(&data.attributes);
        }
        if config.config.load_credentials && data.credentials.is_some() {
            entity.credentials.clone_from(&data.credentials);
        }

        let created = existing.is_none();
        let updated = existing.as_ref().is_some_and(|old| *old != entity);
        let local_id = entity.id;
        if created || updated {
            self.store.put(tenant_id, entity, transaction)?;
        }

        Ok(EntityImportResult {
            local_id,
            created,
            updated,
            all_external_ids_resolved: resolved,
        })
    }

    async fn save_references(
        &self,
        scope: &ImportScope,
        local_id: EntityId,
        data: &EntityExportData,
        config: &EntityTypeVersionLoadConfig,
    ) -> anyhow::Result<()> {
        if !config.config.load_relations {
            return Ok(());
        }
        let ImportScope {
            tenant_id,
            transaction,
        } = *scope;

        let mut relations = Vec::with_capacity(data.relations.len());
        for relation in &data.relations {
            let to = self
                .local_of(tenant_id, relation.to, transaction)
                .ok_or(MissingReferenceError {
                    missing: relation.to,
                })?;
            relations.push(EntityRelation {
                to,
                relation_type: relation.relation_type.clone(),
            });
        }

        let mut entity = self
            .store
            .get(tenant_id, local_id, transaction)
            .with_context(|| format!("imported entity {local_id} disappeared"))?;
        if entity.relations != relations {
            entity.relations = relations;
            self.store.put(tenant_id, entity, transaction)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn setup() -> (Arc<MemoryEntityStore>, JsonEntityCodec, TenantId) {
        let store = Arc::new(MemoryEntityStore::new());
        (Arc::clone(&store), JsonEntityCodec::new(store), TenantId::new())
    }

    fn scope(tenant_id: TenantId) -> ImportScope {
        ImportScope {
            tenant_id,
            transaction: None,
        }
    }

    fn document(external_id: EntityId, references: &[EntityId]) -> EntityExportData {
        EntityExportData {
            entity_type: external_id.entity_type,
            external_id,
            name: format!("entity-{}", external_id.id),
            entity: json!({ "references": references }),
            relations: Vec::new(),
            attributes: Default::default(),
            credentials: None,
        }
    }

    #[tokio::test]
    async fn unresolved_reference_is_reported_before_final_attempt() {
        let (_, codec, tenant) = setup();
        let profile = EntityId::random(EntityType::DeviceProfile);
        let device = document(EntityId::random(EntityType::Device), &[profile]);
        let config = EntityTypeVersionLoadConfig::default();

        let first = codec.import_entity(&scope(tenant), &device, &config, false).await.unwrap();
        assert!(first.created);
        assert!(!first.all_external_ids_resolved);

        let err = codec
            .import_entity(&scope(tenant), &device, &config, true)
            .await
            .unwrap_err();
        let missing = err.downcast_ref::<MissingReferenceError>().unwrap();
        assert_eq!(missing.missing, profile);
    }

    #[tokio::test]
    async fn reimport_after_dependency_resolves_and_updates() {
        let (store, codec, tenant) = setup();
        let profile_ext = EntityId::random(EntityType::DeviceProfile);
        let device = document(EntityId::random(EntityType::Device), &[profile_ext]);
        let config = EntityTypeVersionLoadConfig::default();

        codec.import_entity(&scope(tenant), &device, &config, false).await.unwrap();
        let profile = codec
            .import_entity(&scope(tenant), &document(profile_ext, &[]), &config, false)
            .await
            .unwrap();
        let second = codec.import_entity(&scope(tenant), &device, &config, true).await.unwrap();

        assert!(!second.created);
        assert!(second.updated);
        assert!(second.all_external_ids_resolved);
        let stored = store.get(tenant, second.local_id, None).unwrap();
        assert_eq!(stored.body[REFERENCES][0], serde_json::to_value(profile.local_id).unwrap());
    }

    #[tokio::test]
    async fn identical_reimport_is_neither_created_nor_updated() {
        let (_, codec, tenant) = setup();
        let doc = document(EntityId::random(EntityType::Asset), &[]);
        let config = EntityTypeVersionLoadConfig::default();
        codec.import_entity(&scope(tenant), &doc, &config, true).await.unwrap();
        let again = codec.import_entity(&scope(tenant), &doc, &config, true).await.unwrap();
        assert!(!again.created);
        assert!(!again.updated);
    }

    #[tokio::test]
    async fn empty_credentials_fail_validation() {
        let (_, codec, tenant) = setup();
        let mut doc = document(EntityId::random(EntityType::Device), &[]);
        doc.credentials = Some(json!({ "credentialsId": "" }));
        let err = codec
            .import_entity(&scope(tenant), &doc, &EntityTypeVersionLoadConfig::default(), false)
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<CredentialsValidationError>().is_some());
    }

    #[tokio::test]
    async fn export_rewrites_references_to_external_ids() {
        let (store, codec, tenant) = setup();
        let external = EntityId::random(EntityType::Tag);
        let mut tag = StoredEntity::new(EntityId::random(EntityType::Tag), "t1", json!({}));
        tag.external_id = Some(external);
        let tag_id = tag.id;
        store.insert(tenant, tag);

        let device = StoredEntity::new(
            EntityId::random(EntityType::Device),
            "d1",
            json!({ "references": [tag_id] }),
        );
        let device_id = device.id;
        store.insert(tenant, device);

        let ctx = RequestContext::new(tenant, "tester", "tester@example.com");
        let data = codec
            .export_entity(&ctx, device_id, &VersionCreateConfig::default())
            .await
            .unwrap();
        assert_eq!(data.external_id, device_id);
        assert_eq!(data.entity[REFERENCES][0], serde_json::to_value(external).unwrap());
    }

    #[tokio::test]
    async fn relations_need_existing_targets() {
        let (_, codec, tenant) = setup();
        let mut doc = document(EntityId::random(EntityType::Asset), &[]);
        let target = EntityId::random(EntityType::Customer);
        doc.relations.push(EntityRelation {
            to: target,
            relation_type: "Contains".to_string(),
        });
        let config = EntityTypeVersionLoadConfig::default();
        let result = codec.import_entity(&scope(tenant), &doc, &config, true).await.unwrap();

        let err = codec
            .save_references(&scope(tenant), result.local_id, &doc, &config)
            .await
            .unwrap_err();
        assert_eq!(err.downcast_ref::<MissingReferenceError>().unwrap().missing, target);
    }
}
