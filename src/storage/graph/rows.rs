//! Row conversion between graph records and `SQLite` rows.

// SQLite stores counts and line numbers as i64; they are non-negative by construction.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]

use crate::models::temporal::{from_millis, to_millis};
use crate::models::{
    Entity, EntityId, EntityType, Location, Metadata, Relation, RelationId, RelationType, Source,
};
use crate::{Error, Result};
use rusqlite::{Connection, Row, params};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Serializes a value into a JSON text column.
pub fn to_json<T: Serialize>(value: &T, operation: &str) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::OperationFailed {
        operation: operation.to_string(),
        cause: e.to_string(),
    })
}

fn to_json_opt<T: Serialize>(value: Option<&T>, operation: &str) -> Result<Option<String>> {
    value.map(|v| to_json(v, operation)).transpose()
}

fn from_json<T: DeserializeOwned>(text: Option<String>) -> Option<T> {
    text.and_then(|s| serde_json::from_str(&s).ok())
}

/// Collects the rows that parse and logs the ones that do not.
pub fn collect_rows<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
    operation: &'static str,
) -> Vec<T> {
    rows.filter_map(|row| match row {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(operation, error = %e, "Skipping unreadable row");
            metrics::counter!("graph_store_unreadable_rows_total", "operation" => operation)
                .increment(1);
            None
        },
    })
    .collect()
}

fn entity_type_or_default(id: &str, stored: &str) -> EntityType {
    EntityType::parse(stored).unwrap_or_else(|| {
        tracing::warn!(
            entity_id = id,
            stored_type = stored,
            "Unknown entity type, reading as concept"
        );
        EntityType::Concept
    })
}

fn relation_type_or_default(id: &str, stored: &str) -> RelationType {
    RelationType::parse(stored).unwrap_or_else(|| {
        tracing::warn!(
            relation_id = id,
            stored_type = stored,
            "Unknown relation type, reading as related_to"
        );
        RelationType::RelatedTo
    })
}

/// Parses an entity from a row selected with `Entity.*`.
pub fn parse_entity_row(row: &Row<'_>) -> rusqlite::Result<Entity> {
    let type_str: String = row.get("type")?;
    let source_str: String = row.get("source")?;
    let file_path: Option<String> = row.get("filePath")?;
    let start_line: Option<i64> = row.get("startLine")?;
    let end_line: Option<i64> = row.get("endLine")?;
    let access_count: i64 = row.get("accessCount")?;
    let last_accessed_at: Option<i64> = row.get("lastAccessedAt")?;
    let valid_to: Option<i64> = row.get("validTo")?;
    let supersedes_id: Option<String> = row.get("supersedesId")?;
    let id: String = row.get("id")?;

    let location = file_path.map(|file_path| Location {
        file_path,
        start_line: start_line.unwrap_or(0) as u32,
        end_line: end_line.unwrap_or(0) as u32,
    });

    Ok(Entity {
        entity_type: entity_type_or_default(&id, &type_str),
        id: EntityId::new(id),
        name: row.get("name")?,
        content: row.get("content")?,
        content_preview: row.get("contentPreview")?,
        location,
        signature: from_json(row.get("signature")?),
        class_info: from_json(row.get("classInfo")?),
        source: Source::parse(&source_str).unwrap_or_default(),
        session_id: row.get("sessionId")?,
        project_path: row.get("projectPath")?,
        file_hash: row.get("fileHash")?,
        confidence: row.get("confidence")?,
        access_count: access_count.max(0) as u64,
        last_accessed_at: last_accessed_at.map(from_millis),
        created_at: from_millis(row.get("createdAt")?),
        updated_at: from_millis(row.get("updatedAt")?),
        valid_from: from_millis(row.get("validFrom")?),
        valid_to: valid_to.map(from_millis),
        vector_id: row.get("vectorId")?,
        supersedes_id: supersedes_id.map(EntityId::new),
        metadata: from_json::<Metadata>(row.get("metadata")?).unwrap_or_default(),
    })
}

/// Parses a relation from a row selected with `Relates.*`.
pub fn parse_relation_row(row: &Row<'_>) -> rusqlite::Result<Relation> {
    let type_str: String = row.get("type")?;
    let source_str: String = row.get("source")?;
    let valid_to: Option<i64> = row.get("validTo")?;
    let id: String = row.get("id")?;

    Ok(Relation {
        relation_type: relation_type_or_default(&id, &type_str),
        id: RelationId::new(id),
        from_id: EntityId::new(row.get::<_, String>("fromId")?),
        to_id: EntityId::new(row.get::<_, String>("toId")?),
        weight: row.get("weight")?,
        confidence: row.get("confidence")?,
        created_at: from_millis(row.get("createdAt")?),
        valid_from: from_millis(row.get("validFrom")?),
        valid_to: valid_to.map(from_millis),
        source: Source::parse(&source_str).unwrap_or_default(),
        session_id: row.get("sessionId")?,
        metadata: from_json::<Metadata>(row.get("metadata")?).unwrap_or_default(),
    })
}

/// Inserts a new entity row.
pub fn insert_entity(conn: &Connection, entity: &Entity) -> Result<()> {
    write_entity(
        conn,
        entity,
        "INSERT INTO Entity (
            id, type, name, content, contentPreview, filePath, startLine, endLine,
            signature, classInfo, source, sessionId, projectPath, fileHash, confidence,
            accessCount, lastAccessedAt, createdAt, updatedAt, validFrom, validTo,
            vectorId, supersedesId, metadata
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                  ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24)",
        "create_entity",
    )
}

/// Overwrites every mutable column of an existing entity row.
pub fn update_entity_row(conn: &Connection, entity: &Entity) -> Result<()> {
    write_entity(
        conn,
        entity,
        "UPDATE Entity SET
            type = ?2, name = ?3, content = ?4, contentPreview = ?5,
            filePath = ?6, startLine = ?7, endLine = ?8,
            signature = ?9, classInfo = ?10, source = ?11, sessionId = ?12,
            projectPath = ?13, fileHash = ?14, confidence = ?15, accessCount = ?16,
            lastAccessedAt = ?17, createdAt = ?18, updatedAt = ?19, validFrom = ?20,
            validTo = ?21, vectorId = ?22, supersedesId = ?23, metadata = ?24
        WHERE id = ?1",
        "update_entity",
    )
}

fn write_entity(conn: &Connection, entity: &Entity, sql: &str, operation: &str) -> Result<()> {
    let signature = to_json_opt(entity.signature.as_ref(), operation)?;
    let class_info = to_json_opt(entity.class_info.as_ref(), operation)?;
    let metadata = to_json(&entity.metadata, operation)?;
    let location = entity.location.as_ref();

    conn.execute(
        sql,
        params![
            entity.id.as_str(),
            entity.entity_type.as_str(),
            entity.name,
            entity.content,
            entity.content_preview,
            location.map(|l| l.file_path.as_str()),
            location.map(|l| i64::from(l.start_line)),
            location.map(|l| i64::from(l.end_line)),
            signature,
            class_info,
            entity.source.as_str(),
            entity.session_id,
            entity.project_path,
            entity.file_hash,
            f64::from(entity.confidence),
            entity.access_count as i64,
            entity.last_accessed_at.as_ref().map(to_millis),
            to_millis(&entity.created_at),
            to_millis(&entity.updated_at),
            to_millis(&entity.valid_from),
            entity.valid_to.as_ref().map(to_millis),
            entity.vector_id,
            entity.supersedes_id.as_ref().map(EntityId::as_str),
            metadata,
        ],
    )
    .map_err(|e| Error::OperationFailed {
        operation: operation.to_string(),
        cause: e.to_string(),
    })?;
    Ok(())
}

/// Inserts a relation if both endpoints exist. Returns the number of rows written.
pub fn insert_relation_if_endpoints(conn: &Connection, relation: &Relation) -> Result<usize> {
    let metadata = to_json(&relation.metadata, "create_relation")?;
    conn.execute(
        "INSERT INTO Relates (
            id, fromId, toId, type, weight, confidence, createdAt, validFrom, validTo,
            source, sessionId, metadata
        )
        SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12
        WHERE EXISTS (SELECT 1 FROM Entity WHERE id = ?2)
          AND EXISTS (SELECT 1 FROM Entity WHERE id = ?3)",
        params![
            relation.id.as_str(),
            relation.from_id.as_str(),
            relation.to_id.as_str(),
            relation.relation_type.as_str(),
            f64::from(relation.weight),
            f64::from(relation.confidence),
            to_millis(&relation.created_at),
            to_millis(&relation.valid_from),
            relation.valid_to.as_ref().map(to_millis),
            relation.source.as_str(),
            relation.session_id,
            metadata,
        ],
    )
    .map_err(|e| Error::OperationFailed {
        operation: "create_relation".to_string(),
        cause: e.to_string(),
    })
}

/// Overwrites every mutable column of an existing relation row.
pub fn update_relation_row(conn: &Connection, relation: &Relation) -> Result<()> {
    let metadata = to_json(&relation.metadata, "update_relation")?;
    conn.execute(
        "UPDATE Relates SET
            type = ?2, weight = ?3, confidence = ?4, validTo = ?5,
            source = ?6, sessionId = ?7, metadata = ?8
        WHERE id = ?1",
        params![
            relation.id.as_str(),
            relation.relation_type.as_str(),
            f64::from(relation.weight),
            f64::from(relation.confidence),
            relation.valid_to.as_ref().map(to_millis),
            relation.source.as_str(),
            relation.session_id,
            metadata,
        ],
    )
    .map_err(|e| Error::OperationFailed {
        operation: "update_relation".to_string(),
        cause: e.to_string(),
    })?;
    Ok(())
}
