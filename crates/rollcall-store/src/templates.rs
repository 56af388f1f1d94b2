//! Template persistence: one row per identity, replaced by compare-and-swap.

use rusqlite::{params, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};

use rollcall_core::store::{StoreError, StoredTemplate, TemplateStore};
use rollcall_core::types::{Embedding, Template};

use crate::seal::TemplateCipher;
use crate::{backend, fmt_timestamp, parse_timestamp, SqliteStore};

// First payload byte tags the encoding, so a sealed store opened without
// a key fails loudly instead of parsing garbage.
const PAYLOAD_PLAIN: u8 = 0;
const PAYLOAD_SEALED: u8 = 1;

#[derive(Serialize)]
struct PayloadRef<'a> {
    samples: &'a [Embedding],
    representative: &'a Embedding,
}

#[derive(Deserialize)]
struct PayloadOwned {
    samples: Vec<Embedding>,
    representative: Embedding,
}

fn encode_payload(
    cipher: &Option<TemplateCipher>,
    template: &Template,
) -> Result<Vec<u8>, StoreError> {
    let json = serde_json::to_vec(&PayloadRef {
        samples: &template.samples,
        representative: &template.representative,
    })
    .map_err(|err| StoreError::Backend(err.to_string()))?;

    let mut blob;
    match cipher {
        Some(cipher) => {
            let sealed = cipher
                .seal(&json)
                .map_err(|err| StoreError::Backend(err.to_string()))?;
            blob = Vec::with_capacity(1 + sealed.len());
            blob.push(PAYLOAD_SEALED);
            blob.extend_from_slice(&sealed);
        }
        None => {
            blob = Vec::with_capacity(1 + json.len());
            blob.push(PAYLOAD_PLAIN);
            blob.extend_from_slice(&json);
        }
    }
    Ok(blob)
}

fn decode_payload(
    cipher: &Option<TemplateCipher>,
    identity_id: &str,
    blob: &[u8],
) -> Result<PayloadOwned, StoreError> {
    let corrupt = |message: String| StoreError::Corrupt {
        identity_id: identity_id.to_string(),
        message,
    };

    let json = match blob.split_first() {
        Some((&PAYLOAD_PLAIN, rest)) => rest.to_vec(),
        Some((&PAYLOAD_SEALED, rest)) => {
            let cipher = cipher
                .as_ref()
                .ok_or_else(|| corrupt("template is sealed but no sealing key is configured".into()))?;
            cipher.open(rest).map_err(|err| corrupt(err.to_string()))?
        }
        Some((tag, _)) => return Err(corrupt(format!("unknown payload tag {tag}"))),
        None => return Err(corrupt("empty payload".into())),
    };

    serde_json::from_slice(&json).map_err(|err| corrupt(format!("invalid payload: {err}")))
}

impl TemplateStore for SqliteStore {
    fn get(&mut self, identity_id: &str) -> Result<Option<StoredTemplate>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT revision, created_at, payload FROM templates WHERE identity_id = ?1",
                params![identity_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(backend)?;

        let Some((revision, created_at, blob)) = row else {
            return Ok(None);
        };
        let payload = decode_payload(&self.cipher, identity_id, &blob)?;
        Ok(Some(StoredTemplate {
            template: Template {
                identity_id: identity_id.to_string(),
                samples: payload.samples,
                representative: payload.representative,
                created_at: parse_timestamp(identity_id, &created_at)?,
            },
            revision,
        }))
    }

    fn replace(
        &mut self,
        identity_id: &str,
        template: &Template,
        expected_revision: Option<i64>,
    ) -> Result<i64, StoreError> {
        let payload = encode_payload(&self.cipher, template)?;

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(backend)?;

        if !SqliteStore::identity_exists(&tx, identity_id)? {
            return Err(StoreError::UnknownIdentity(identity_id.to_string()));
        }

        let current: Option<i64> = tx
            .query_row(
                "SELECT revision FROM templates WHERE identity_id = ?1",
                params![identity_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(backend)?;

        if current != expected_revision {
            return Err(StoreError::Conflict {
                identity_id: identity_id.to_string(),
            });
        }

        let revision = current.unwrap_or(0) + 1;
        tx.execute(
            "INSERT INTO templates
                 (identity_id, revision, extractor_version, dimensionality,
                  sample_count, created_at, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(identity_id) DO UPDATE SET
                 revision = excluded.revision,
                 extractor_version = excluded.extractor_version,
                 dimensionality = excluded.dimensionality,
                 sample_count = excluded.sample_count,
                 created_at = excluded.created_at,
                 payload = excluded.payload",
            params![
                identity_id,
                revision,
                template.extractor_version(),
                template.dimensionality() as i64,
                template.sample_count() as i64,
                fmt_timestamp(template.created_at),
                payload,
            ],
        )
        .map_err(backend)?;
        tx.commit().map_err(backend)?;

        tracing::debug!(identity = identity_id, revision, "template replaced");
        Ok(revision)
    }
}
